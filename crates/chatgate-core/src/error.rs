use axum::body::Body;
use axum::response::Response;
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderValue, StatusCode};
use serde::Serialize;

use crate::classify::{ClassifiedError, ErrorCategory, ErrorMeta};
use crate::relay::REQUEST_ID_HEADER;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error_type: ErrorCategory,
    pub status: u16,
    pub code: String,
    /// Upstream wording, unmodified.
    pub message: String,
    pub request_id: String,
    pub retry_after: Option<u64>,
    pub meta: EnvelopeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeMeta {
    pub hint: String,
    pub upstream: ErrorMeta,
}

impl ErrorEnvelope {
    pub fn new(error: &ClassifiedError, request_id: &str) -> Self {
        Self {
            ok: false,
            error_type: error.category,
            status: status_for(error).as_u16(),
            code: error.code.clone(),
            message: error.message.clone(),
            request_id: request_id.to_string(),
            retry_after: error.retry_after_seconds,
            meta: EnvelopeMeta {
                hint: hint_for(error),
                upstream: error.meta.clone(),
            },
        }
    }
}

/// Mirrors 400/401/429 from upstream, otherwise picks by category.
pub fn status_for(error: &ClassifiedError) -> StatusCode {
    if let Some(status) = error.meta.upstream_status
        && matches!(status, 400 | 401 | 429)
        && let Ok(status) = StatusCode::from_u16(status)
    {
        return status;
    }
    match error.category {
        ErrorCategory::Quota | ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Auth => StatusCode::UNAUTHORIZED,
        ErrorCategory::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCategory::Network if error.meta.timed_out => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Network => StatusCode::BAD_GATEWAY,
        ErrorCategory::Unknown if error.meta.upstream_status.is_some() => StatusCode::BAD_GATEWAY,
        ErrorCategory::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Actionable guidance; names the wait when the provider gave one.
pub fn hint_for(error: &ClassifiedError) -> String {
    let hint = match error.category {
        ErrorCategory::Quota => {
            "The upstream account has no quota left. Add billing credit or raise the limit before retrying."
        }
        ErrorCategory::RateLimit => "The upstream rate limit was reached.",
        ErrorCategory::Auth => "The upstream rejected the gateway credentials. Check the configured API key.",
        ErrorCategory::InvalidRequest => "The request payload was rejected. Fix it before retrying.",
        ErrorCategory::Network if error.meta.timed_out => {
            "The upstream did not answer in time. The whole request can be retried later."
        }
        ErrorCategory::Network => "The upstream could not be reached. The whole request can be retried later.",
        ErrorCategory::Unknown => "Unexpected upstream failure. See meta.upstream for the raw error.",
    };
    match error.retry_after_seconds {
        Some(1) => format!("{hint} Retry after 1 second."),
        Some(seconds) => format!("{hint} Retry after {seconds} seconds."),
        None if error.category == ErrorCategory::RateLimit => {
            format!("{hint} Retry after a short delay.")
        }
        None => hint.to_string(),
    }
}

pub fn error_response(error: &ClassifiedError, request_id: &str) -> Response {
    let envelope = ErrorEnvelope::new(error, request_id);
    let status = StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| {
        br#"{"ok":false,"errorType":"unknown","code":"gateway_error"}"#.to_vec()
    });

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Some(seconds) = error.retry_after_seconds {
        headers.insert(RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}
