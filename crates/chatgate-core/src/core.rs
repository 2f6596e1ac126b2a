use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use chatgate_common::GatewayConfig;

use crate::handler::{chat_handler, health_handler};
use crate::upstream_client::{UpstreamClient, WreqUpstreamClient};

pub struct CoreState {
    pub config: Arc<GatewayConfig>,
    pub upstream: Arc<dyn UpstreamClient>,
}

pub struct Core {
    state: Arc<CoreState>,
}

impl Core {
    pub fn new(config: GatewayConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            state: Arc::new(CoreState {
                config: Arc::new(config),
                upstream,
            }),
        }
    }

    /// Wires the production upstream client from `config`.
    pub fn from_config(config: GatewayConfig) -> Result<Self, wreq::Error> {
        let upstream = Arc::new(WreqUpstreamClient::new(&config)?);
        Ok(Self::new(config, upstream))
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/chat", post(chat_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<CoreState> {
        self.state.clone()
    }
}
