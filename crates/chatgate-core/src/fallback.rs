//! Primary attempt plus at most one fallback attempt.
//!
//! The machine has two states. `Primary -> Fallback` fires only for a
//! `rate_limit` classification when a distinct fallback model is available;
//! every other failure, and any failure in `Fallback`, is terminal.

use http::HeaderMap;

use crate::classify::{ClassifiedError, ErrorCategory, classify_outcome};
use crate::log::RequestLog;
use crate::model::ModelSelection;
use crate::upstream_client::{ByteStream, UpstreamCall, UpstreamClient, UpstreamOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Primary,
    Fallback,
}

impl AttemptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptPhase::Primary => "primary",
            AttemptPhase::Fallback => "fallback",
        }
    }
}

/// Request-scoped record of whether the served model differs from the requested one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackDecision {
    pub attempted: bool,
    pub original_model: String,
    pub final_model: String,
    pub reason: Option<String>,
}

impl FallbackDecision {
    fn primary(model: &str) -> Self {
        Self {
            attempted: false,
            original_model: model.to_string(),
            final_model: model.to_string(),
            reason: None,
        }
    }
}

pub enum AttemptResult {
    Served {
        headers: HeaderMap,
        body: ByteStream,
        decision: FallbackDecision,
        latency_ms: u64,
    },
    Failed {
        error: ClassifiedError,
        decision: FallbackDecision,
    },
}

impl std::fmt::Debug for AttemptResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptResult::Served {
                decision,
                latency_ms,
                ..
            } => f
                .debug_struct("Served")
                .field("decision", decision)
                .field("latency_ms", latency_ms)
                .finish(),
            AttemptResult::Failed { error, decision } => f
                .debug_struct("Failed")
                .field("error", error)
                .field("decision", decision)
                .finish(),
        }
    }
}

/// Model to retry with, if this failure in this phase allows it.
pub fn fallback_target<'a>(
    phase: AttemptPhase,
    selection: &'a ModelSelection,
    error: &ClassifiedError,
) -> Option<&'a str> {
    if phase != AttemptPhase::Primary || error.category != ErrorCategory::RateLimit {
        return None;
    }
    selection
        .fallback
        .as_deref()
        .filter(|fallback| *fallback != selection.model)
}

/// Runs the attempts sequentially; the fallback call starts only after the
/// primary outcome has been classified.
pub async fn execute(
    client: &dyn UpstreamClient,
    call: UpstreamCall,
    selection: &ModelSelection,
    log: &RequestLog,
) -> AttemptResult {
    let mut phase = AttemptPhase::Primary;
    let mut call = call.with_model(selection.model.as_str());
    let mut decision = FallbackDecision::primary(&selection.model);

    loop {
        let outcome = client.invoke(&call).await;
        let latency_ms = outcome.latency_ms();
        let error = match outcome {
            UpstreamOutcome::Success { headers, body, .. } => {
                decision.final_model = call.model.clone();
                return AttemptResult::Served {
                    headers,
                    body,
                    decision,
                    latency_ms,
                };
            }
            failed => match classify_outcome(&failed) {
                Some(error) => error,
                None => ClassifiedError::internal("upstream outcome could not be classified"),
            },
        };
        log.upstream_failure(phase, &call.model, &error, latency_ms);

        match fallback_target(phase, selection, &error) {
            Some(target) => {
                log.fallback_attempt(&call.model, target, error.category.as_str());
                decision.attempted = true;
                decision.reason = Some(error.category.as_str().to_string());
                decision.final_model = target.to_string();
                call = call.with_model(target);
                phase = AttemptPhase::Fallback;
            }
            None => return AttemptResult::Failed { error, decision },
        }
    }
}
