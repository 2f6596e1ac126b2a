use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::Json;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use futures_util::stream;
use serde_json::{Value, json};
use tower::ServiceExt;

use chatgate_common::{GatewayConfig, GatewayConfigPatch};
use chatgate_core::Core;

const FRAMES: [&str; 3] = [
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
];

#[derive(Clone, Default)]
struct Seen {
    hits: Arc<AtomicUsize>,
    models: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Seen {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

/// Serves `/v1/chat/completions`; `respond` gets the zero-based call index.
async fn spawn_upstream<F>(seen: Seen, respond: F) -> String
where
    F: Fn(usize, Value) -> Response + Clone + Send + Sync + 'static,
{
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<Value>| {
            let seen = seen.clone();
            let respond = respond.clone();
            async move {
                let idx = seen.hits.fetch_add(1, Ordering::SeqCst);
                if let Some(model) = body.get("model").and_then(Value::as_str) {
                    seen.models.lock().unwrap().push(model.to_string());
                }
                seen.bodies.lock().unwrap().push(body.clone());
                respond(idx, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}:{}/v1", addr.ip(), addr.port())
}

fn config(base_url: String, patch: GatewayConfigPatch) -> GatewayConfig {
    let mut base = GatewayConfigPatch {
        api_key: Some("sk-test".to_string()),
        base_url: Some(base_url),
        default_model: Some("primary-model".to_string()),
        fallback_model: Some("backup-model".to_string()),
        fallback_enabled: Some(true),
        timeout_ms: Some(2_000),
        ..Default::default()
    };
    base.overlay(patch);
    base.into_config().unwrap()
}

fn sse(frames: &[&'static str]) -> Response {
    let chunks: Vec<Result<Bytes, io::Error>> = frames
        .iter()
        .map(|frame| Ok(Bytes::from_static(frame.as_bytes())))
        .collect();
    (
        [("content-type", "text/event-stream")],
        Body::from_stream(stream::iter(chunks)),
    )
        .into_response()
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .header("x-request-id", "req-42")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn hello() -> Value {
    json!({ "messages": [{ "role": "user", "content": "Say hello" }], "agent": "Jake" })
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn streams_upstream_frames_then_sentinel() {
    let seen = Seen::default();
    let base = spawn_upstream(seen.clone(), |_, _| sse(&FRAMES)).await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert!(!response.headers().contains_key("x-served-model"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let expected = format!("{}{}{}data: [DONE]\n\n", FRAMES[0], FRAMES[1], FRAMES[2]);
    assert_eq!(String::from_utf8(body.to_vec()).unwrap(), expected);

    assert_eq!(seen.hits(), 1);
    let sent = seen.bodies.lock().unwrap()[0].clone();
    assert_eq!(sent["model"], json!("primary-model"));
    assert_eq!(sent["stream"], json!(true));
    assert_eq!(sent["max_tokens"], json!(2048));
    assert_eq!(sent["messages"][0]["role"], json!("system"));
    assert!(sent["messages"][0]["content"].as_str().unwrap().starts_with("You are Jake"));
    assert_eq!(sent["messages"][1], json!({ "role": "user", "content": "Say hello" }));
}

#[tokio::test]
async fn rate_limit_falls_back_once_and_discloses_models() {
    let seen = Seen::default();
    let base = spawn_upstream(seen.clone(), |idx, _| {
        if idx == 0 {
            (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(json!({
                    "error": { "type": "requests", "code": "rate_limit_exceeded", "message": "Rate limit reached" }
                })),
            )
                .into_response()
        } else {
            sse(&FRAMES[..1])
        }
    })
    .await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-original-model"], "primary-model");
    assert_eq!(response.headers()["x-served-model"], "backup-model");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8(body.to_vec()).unwrap().ends_with("data: [DONE]\n\n"));

    assert_eq!(seen.hits(), 2);
    assert_eq!(seen.models(), vec!["primary-model", "backup-model"]);
}

#[tokio::test]
async fn fallback_failure_is_returned_without_third_call() {
    let seen = Seen::default();
    let base = spawn_upstream(seen.clone(), |_, _| {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "12")],
            axum::Json(json!({ "error": { "code": "rate_limit_exceeded", "message": "Slow down" } })),
        )
            .into_response()
    })
    .await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "12");
    let envelope = json_body(response).await;
    assert_eq!(envelope["errorType"], json!("rate_limit"));
    assert_eq!(envelope["retryAfter"], json!(12));
    assert_eq!(envelope["message"], json!("Slow down"));
    assert!(
        envelope["meta"]["hint"]
            .as_str()
            .unwrap()
            .contains("Retry after 12 seconds")
    );
    assert_eq!(envelope["requestId"], json!("req-42"));
    assert_eq!(seen.hits(), 2);
}

#[tokio::test]
async fn quota_is_terminal_and_verbatim() {
    let seen = Seen::default();
    let message = "You exceeded your current quota, please check your plan and billing details.";
    let base = spawn_upstream(seen.clone(), move |_, _| {
        (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(json!({
                "error": { "type": "insufficient_quota", "code": "insufficient_quota", "message": message }
            })),
        )
            .into_response()
    })
    .await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let envelope = json_body(response).await;
    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["errorType"], json!("quota"));
    assert_eq!(envelope["code"], json!("insufficient_quota"));
    assert_eq!(envelope["message"], json!(message));
    assert_eq!(seen.hits(), 1);
}

#[tokio::test]
async fn slow_upstream_times_out_with_504() {
    let app_upstream = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            sse(&FRAMES)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app_upstream).await;
    });
    let base = format!("http://{}:{}/v1", addr.ip(), addr.port());

    let patch = GatewayConfigPatch {
        timeout_ms: Some(200),
        ..Default::default()
    };
    let app = Core::from_config(config(base, patch)).unwrap().router();

    let started = Instant::now();
    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let envelope = json_body(response).await;
    assert_eq!(envelope["errorType"], json!("network"));
    assert_eq!(envelope["code"], json!("upstream_timeout"));
    assert_eq!(envelope["meta"]["upstream"]["timedOut"], json!(true));
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = format!("http://{}:{}/v1", addr.ip(), addr.port());
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let envelope = json_body(response).await;
    assert_eq!(envelope["errorType"], json!("network"));
    assert_eq!(envelope["code"], json!("upstream_unreachable"));
}

#[tokio::test]
async fn invalid_payload_never_reaches_upstream() {
    let seen = Seen::default();
    let base = spawn_upstream(seen.clone(), |_, _| sse(&FRAMES)).await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let cases = [
        json!({ "messages": [] }),
        json!({ "messages": [{ "role": "user", "content": "   " }] }),
        json!({ "model": "gpt-4o" }),
    ];
    for case in cases {
        let response = app.clone().oneshot(chat_request(case)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-request-id"], "req-42");
        let envelope = json_body(response).await;
        assert_eq!(envelope["errorType"], json!("invalid_request"));
    }

    let malformed = Request::builder()
        .method("POST")
        .uri("/chat")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(seen.hits(), 0);
}

#[tokio::test]
async fn non_streaming_returns_upstream_json() {
    let seen = Seen::default();
    let base = spawn_upstream(seen.clone(), |_, _| {
        axum::Json(json!({
            "id": "chatcmpl-1",
            "choices": [{ "message": { "role": "assistant", "content": "Hello!" } }]
        }))
        .into_response()
    })
    .await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let mut request = hello();
    request["stream"] = json!(false);
    request["maxTokens"] = json!(64);
    let response = app.oneshot(chat_request(request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = json_body(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], json!("Hello!"));

    let sent = seen.bodies.lock().unwrap()[0].clone();
    assert_eq!(sent["stream"], json!(false));
    assert_eq!(sent["max_tokens"], json!(64));
}

#[tokio::test]
async fn mid_stream_failure_aborts_body() {
    let seen = Seen::default();
    let base = spawn_upstream(seen.clone(), |_, _| {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(FRAMES[0].as_bytes())),
            Ok(Bytes::from_static(FRAMES[1].as_bytes())),
            Err(io::Error::other("upstream reset")),
        ];
        (
            [("content-type", "text/event-stream")],
            Body::from_stream(stream::iter(chunks)),
        )
            .into_response()
    })
    .await;
    let app = Core::from_config(config(base, GatewayConfigPatch::default()))
        .unwrap()
        .router();

    let response = app.oneshot(chat_request(hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn health_reports_models() {
    let app = Core::from_config(config(
        "http://127.0.0.1:9/v1".to_string(),
        GatewayConfigPatch::default(),
    ))
    .unwrap()
    .router();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(
        body,
        json!({ "status": "ok", "model": "primary-model", "fallbackModel": "backup-model" })
    );
}
