pub mod classify;
pub mod core;
pub mod error;
pub mod fallback;
pub mod handler;
pub mod log;
pub mod model;
pub mod normalize;
pub mod relay;
pub mod upstream_client;

pub use classify::{ClassifiedError, ErrorCategory, classify, classify_outcome};
pub use crate::core::{Core, CoreState};
pub use error::{ErrorEnvelope, error_response};
pub use fallback::{AttemptPhase, AttemptResult, FallbackDecision};
pub use normalize::{ChatRequest, normalize_request};
pub use relay::{CloseReason, StreamSession, StreamState};
pub use upstream_client::{UpstreamCall, UpstreamClient, UpstreamOutcome, WreqUpstreamClient};
