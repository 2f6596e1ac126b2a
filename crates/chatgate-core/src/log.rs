//! Lifecycle logging keyed by request id.
//!
//! Failures after the response head is flushed are only visible here.

use std::time::Instant;

use http::StatusCode;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::classify::{ClassifiedError, ErrorCategory};
use crate::fallback::AttemptPhase;

#[derive(Debug, Clone)]
pub struct RequestLog {
    request_id: String,
    started_at: Instant,
}

/// Event name for a classified upstream failure.
pub fn failure_event(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Quota => "request.quota_error",
        ErrorCategory::RateLimit => "request.rate_limit",
        _ => "request.error",
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl RequestLog {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            started_at: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn start(
        &self,
        model: &str,
        messages: usize,
        stream: bool,
        agent: Option<&str>,
        user_id: Option<&str>,
    ) {
        info!(
            event = "request.start",
            request_id = %self.request_id,
            at = %now_rfc3339(),
            model = %model,
            messages = messages,
            stream = stream,
            agent = agent.unwrap_or(""),
            user_id = user_id.unwrap_or("")
        );
    }

    pub fn upstream_failure(
        &self,
        phase: AttemptPhase,
        model: &str,
        error: &ClassifiedError,
        latency_ms: u64,
    ) {
        warn!(
            event = failure_event(error.category),
            request_id = %self.request_id,
            at = %now_rfc3339(),
            phase = phase.as_str(),
            model = %model,
            category = error.category.as_str(),
            code = %error.code,
            upstream_status = ?error.meta.upstream_status,
            retry_after = ?error.retry_after_seconds,
            latency_ms = latency_ms,
            elapsed_ms = self.elapsed_ms(),
            error = %error.message
        );
    }

    pub fn fallback_attempt(&self, from: &str, to: &str, reason: &str) {
        info!(
            event = "request.fallback_attempt",
            request_id = %self.request_id,
            at = %now_rfc3339(),
            from_model = %from,
            to_model = %to,
            reason = %reason,
            elapsed_ms = self.elapsed_ms()
        );
    }

    /// Upstream accepted the call and the response head is being sent.
    pub fn response(&self, model: &str, status: StatusCode, stream: bool, fallback_used: bool) {
        info!(
            event = "request.response",
            request_id = %self.request_id,
            at = %now_rfc3339(),
            model = %model,
            status = status.as_u16(),
            stream = stream,
            fallback_used = fallback_used,
            elapsed_ms = self.elapsed_ms()
        );
    }

    pub fn stream_complete(&self, chunks: u64, bytes: u64, client_disconnected: bool) {
        info!(
            event = "request.stream_complete",
            request_id = %self.request_id,
            at = %now_rfc3339(),
            chunks = chunks,
            bytes = bytes,
            client_disconnected = client_disconnected,
            elapsed_ms = self.elapsed_ms()
        );
    }

    pub fn stream_error(&self, chunks: u64, bytes: u64, message: &str) {
        warn!(
            event = "request.stream_error",
            request_id = %self.request_id,
            at = %now_rfc3339(),
            chunks = chunks,
            bytes = bytes,
            error = %message,
            elapsed_ms = self.elapsed_ms()
        );
    }

    /// Final outcome of a request answered with an error envelope.
    pub fn failure(&self, error: &ClassifiedError, status: StatusCode) {
        warn!(
            event = "request.failure",
            request_id = %self.request_id,
            at = %now_rfc3339(),
            status = status.as_u16(),
            category = error.category.as_str(),
            code = %error.code,
            elapsed_ms = self.elapsed_ms()
        );
    }
}
