//! Upstream failure taxonomy.
//!
//! Providers signal the same condition through several redundant channels (HTTP
//! status, `error.type`, `error.code`, free text). Rules are checked in a fixed
//! order and the first match wins: structured fields first, text heuristics last.
//! Quota is checked before rate limiting because both arrive as HTTP 429 and only
//! a rate limit may trigger the fallback model.

use std::time::SystemTime;

use http::HeaderMap;
use http::header::RETRY_AFTER;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::upstream_client::UpstreamOutcome;

const QUOTA_TOKENS: &[&str] = &[
    "insufficient_quota",
    "quota_exceeded",
    "billing_hard_limit_reached",
    "billing_not_active",
];
const RATE_LIMIT_TOKENS: &[&str] = &[
    "rate_limit_exceeded",
    "rate_limit_error",
    "rate_limited",
    "too_many_requests",
];
const AUTH_TOKENS: &[&str] = &[
    "invalid_api_key",
    "authentication_error",
    "invalid_authentication",
    "unauthorized",
];
const INVALID_REQUEST_TOKENS: &[&str] = &["invalid_request_error", "context_length_exceeded"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Quota,
    RateLimit,
    Auth,
    InvalidRequest,
    Network,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Quota => "quota",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }

    fn default_code(&self, timed_out: bool) -> &'static str {
        match self {
            ErrorCategory::Quota => "insufficient_quota",
            ErrorCategory::RateLimit => "rate_limit_exceeded",
            ErrorCategory::Auth => "invalid_api_key",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Network if timed_out => "upstream_timeout",
            ErrorCategory::Network => "upstream_unreachable",
            ErrorCategory::Unknown => "upstream_error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMeta {
    /// HTTP status the provider answered with; `None` when no response arrived.
    pub upstream_status: Option<u16>,
    pub upstream_type: Option<String>,
    pub timed_out: bool,
    /// Provider error object (or raw text when it was not JSON).
    pub raw: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub code: String,
    /// Provider wording, verbatim when available.
    pub message: String,
    pub retry_after_seconds: Option<u64>,
    pub meta: ErrorMeta,
}

impl ClassifiedError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::InvalidRequest,
            code: ErrorCategory::InvalidRequest.default_code(false).to_string(),
            message: message.into(),
            retry_after_seconds: None,
            meta: ErrorMeta::default(),
        }
    }

    /// Gateway-side failure that never reached a provider verdict.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Unknown,
            code: "gateway_error".to_string(),
            message: message.into(),
            retry_after_seconds: None,
            meta: ErrorMeta::default(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.category == ErrorCategory::Network && self.meta.timed_out
    }
}

/// Structured fields pulled from a provider error body.
#[derive(Debug, Default)]
struct ErrorFields {
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
    object: Option<JsonValue>,
}

fn error_fields(body: Option<&JsonValue>) -> ErrorFields {
    let Some(body) = body else {
        return ErrorFields::default();
    };
    match body.get("error") {
        Some(JsonValue::Object(error)) => ErrorFields {
            kind: error.get("type").and_then(scalar_to_string),
            code: error.get("code").and_then(scalar_to_string),
            message: error.get("message").and_then(scalar_to_string),
            object: Some(JsonValue::Object(error.clone())),
        },
        Some(JsonValue::String(message)) => ErrorFields {
            kind: None,
            code: body.get("code").and_then(scalar_to_string),
            message: Some(message.clone()),
            object: Some(body.clone()),
        },
        _ => ErrorFields {
            kind: body.get("type").and_then(scalar_to_string),
            code: body.get("code").and_then(scalar_to_string),
            message: body
                .get("message")
                .or_else(|| body.get("detail"))
                .and_then(scalar_to_string),
            object: Some(body.clone()),
        },
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) if !text.trim().is_empty() => Some(text.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn has_token(fields: &ErrorFields, tokens: &[&str]) -> bool {
    [fields.kind.as_deref(), fields.code.as_deref()]
        .into_iter()
        .flatten()
        .any(|value| {
            let value = value.to_ascii_lowercase();
            tokens.iter().any(|token| value == *token)
        })
}

fn categorize(status: u16, fields: &ErrorFields, text: &str) -> ErrorCategory {
    let mentions_quota = text.contains("quota");
    if has_token(fields, QUOTA_TOKENS)
        || (mentions_quota
            && (text.contains("exceeded") || text.contains("billing") || text.contains("plan")))
    {
        return ErrorCategory::Quota;
    }
    if has_token(fields, RATE_LIMIT_TOKENS)
        || status == 429
        || (text.contains("rate limit") && !mentions_quota && !text.contains("billing"))
    {
        return ErrorCategory::RateLimit;
    }
    if has_token(fields, AUTH_TOKENS)
        || status == 401
        || text.contains("api key")
        || text.contains("authentication")
        || text.contains("unauthorized")
    {
        return ErrorCategory::Auth;
    }
    if has_token(fields, INVALID_REQUEST_TOKENS) || status == 400 {
        return ErrorCategory::InvalidRequest;
    }
    ErrorCategory::Unknown
}

/// Classifies an HTTP error answer from the provider.
///
/// Pure apart from `Retry-After` HTTP dates, which are measured against the
/// current clock.
pub fn classify(
    status: u16,
    headers: &HeaderMap,
    body: Option<&JsonValue>,
    raw_text: &str,
) -> ClassifiedError {
    let fields = error_fields(body);
    let message = fields
        .message
        .clone()
        .or_else(|| {
            let trimmed = raw_text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("upstream returned HTTP {status}"));
    let text = message.to_ascii_lowercase();
    let category = categorize(status, &fields, &text);

    let retry_after_seconds =
        retry_after_from_headers(headers).or_else(|| retry_after_from_message(&text));
    let code = fields
        .code
        .clone()
        .or_else(|| fields.kind.clone())
        .unwrap_or_else(|| category.default_code(false).to_string());
    let raw = fields.object.or_else(|| {
        let trimmed = raw_text.trim();
        (!trimmed.is_empty()).then(|| JsonValue::String(trimmed.to_string()))
    });

    ClassifiedError {
        category,
        code,
        message,
        retry_after_seconds,
        meta: ErrorMeta {
            upstream_status: Some(status),
            upstream_type: fields.kind,
            timed_out: false,
            raw,
        },
    }
}

/// Classifies a failure where no HTTP response was obtained.
pub fn classify_transport(timed_out: bool, message: &str) -> ClassifiedError {
    let message = if timed_out {
        format!("upstream request timed out: {message}")
    } else {
        format!("upstream request failed: {message}")
    };
    ClassifiedError {
        category: ErrorCategory::Network,
        code: ErrorCategory::Network.default_code(timed_out).to_string(),
        message,
        retry_after_seconds: None,
        meta: ErrorMeta {
            timed_out,
            ..ErrorMeta::default()
        },
    }
}

/// Classifies a failed outcome; `None` for a success.
pub fn classify_outcome(outcome: &UpstreamOutcome) -> Option<ClassifiedError> {
    match outcome {
        UpstreamOutcome::Success { .. } => None,
        UpstreamOutcome::Failure {
            status,
            headers,
            parsed_body,
            raw_text,
            ..
        } => Some(classify(*status, headers, parsed_body.as_ref(), raw_text)),
        UpstreamOutcome::TransportError {
            timed_out, message, ..
        } => Some(classify_transport(*timed_out, message)),
    }
}

fn retry_after_from_headers(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    if let Ok(seconds) = value.parse::<f64>()
        && seconds.is_finite()
        && seconds >= 0.0
    {
        return Some(seconds.ceil() as u64);
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .map(|duration| duration.as_secs())
            .unwrap_or(0),
    )
}

/// Finds "retry in 20 seconds" / "try again in 1.5s" style hints. Every
/// anchor is tried in order, so an earlier unitless "retry later" does not
/// hide a later concrete delay.
fn retry_after_from_message(text: &str) -> Option<u64> {
    let mut anchors: Vec<usize> = ["retry", "try again"]
        .iter()
        .flat_map(|anchor| text.match_indices(anchor).map(|(idx, _)| idx))
        .collect();
    anchors.sort_unstable();
    anchors
        .into_iter()
        .find_map(|start| delay_after_anchor(&text[start..]))
}

fn delay_after_anchor(rest: &str) -> Option<u64> {
    let digits_at = rest.find(|c: char| c.is_ascii_digit())?;
    let rest = &rest[digits_at..];
    let number_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let value = rest[..number_len].trim_end_matches('.').parse::<f64>().ok()?;
    let unit = rest[number_len..].trim_start();

    let seconds = if unit.starts_with("ms") || unit.starts_with("millisecond") {
        value / 1000.0
    } else if unit.starts_with('s') {
        value
    } else if unit.starts_with('m') {
        value * 60.0
    } else if unit.starts_with('h') {
        value * 3600.0
    } else {
        return None;
    };
    Some(seconds.ceil() as u64)
}
