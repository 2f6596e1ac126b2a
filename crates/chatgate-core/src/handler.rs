use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use uuid::Uuid;

use chatgate_protocol::ChatRequestBody;

use crate::classify::ClassifiedError;
use crate::core::CoreState;
use crate::error::{error_response, status_for};
use crate::fallback::{self, AttemptResult};
use crate::log::RequestLog;
use crate::model::{resolve_max_tokens, resolve_temperature, select_model, system_prompt};
use crate::normalize::normalize_request;
use crate::relay::{REQUEST_ID_HEADER, StreamSession, collect_body, stream_response, success_headers};
use crate::upstream_client::UpstreamCall;

const MAX_REQUEST_ID_LEN: usize = 128;

pub async fn chat_handler(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let log = RequestLog::new(request_id(&headers));

    let body: ChatRequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return reject(
                &log,
                ClassifiedError::invalid_request(format!("request body is not valid JSON: {err}")),
            );
        }
    };
    let request = match normalize_request(body, log.request_id().to_string()) {
        Ok(request) => request,
        Err(err) => return reject(&log, ClassifiedError::invalid_request(err.to_string())),
    };

    let config = &state.config;
    let selection = select_model(request.model.as_deref(), config);
    log.start(
        &selection.model,
        request.messages.len(),
        request.stream,
        request.agent.as_deref(),
        request.user_id.as_deref(),
    );

    let timeout = Duration::from_millis(config.timeout_ms);
    let call = UpstreamCall {
        model: selection.model.clone(),
        system_prompt: system_prompt(request.agent.as_deref()).to_string(),
        messages: request.messages,
        stream: request.stream,
        temperature: resolve_temperature(request.temperature),
        max_tokens: resolve_max_tokens(request.max_tokens, config.max_output_tokens),
        timeout,
    };

    let (body, decision) =
        match fallback::execute(state.upstream.as_ref(), call, &selection, &log).await {
            AttemptResult::Served { body, decision, .. } => (body, decision),
            AttemptResult::Failed { error, .. } => return reject(&log, error),
        };

    if request.stream {
        log.response(&decision.final_model, StatusCode::OK, true, decision.attempted);
        let idle_timeout = Duration::from_millis(config.stream_idle_timeout_ms);
        return stream_response(body, StreamSession::new(), log, &decision, idle_timeout);
    }

    let payload = match collect_body(body, timeout).await {
        Ok(payload) => payload,
        Err(error) => return reject(&log, error),
    };
    log.response(&decision.final_model, StatusCode::OK, false, decision.attempted);

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .extend(success_headers(log.request_id(), &decision));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub async fn health_handler(State(state): State<Arc<CoreState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "model": state.config.default_model,
        "fallbackModel": state
            .config
            .fallback_model
            .as_deref()
            .filter(|_| state.config.fallback_enabled),
    }))
}

fn reject(log: &RequestLog, error: ClassifiedError) -> Response {
    log.failure(&error, status_for(&error));
    error_response(&error, log.request_id())
}

/// Caller-supplied correlation id, or a fresh UUID v7.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}
