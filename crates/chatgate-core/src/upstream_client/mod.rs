use std::io;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::HeaderMap;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value as JsonValue;
use wreq::{Client, Proxy};

use chatgate_common::GatewayConfig;
use chatgate_protocol::{ChatCompletionBody, ChatMessage};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed for one POST to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamCall {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Bounds the time to response headers (and to the full error body).
    pub timeout: Duration,
}

impl UpstreamCall {
    pub fn body(&self) -> ChatCompletionBody {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.messages.iter().cloned());
        ChatCompletionBody {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream,
        }
    }

    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

/// Result of exactly one provider call. Consumed at the call site.
pub enum UpstreamOutcome {
    Success {
        headers: HeaderMap,
        /// Unconsumed response body.
        body: ByteStream,
        latency_ms: u64,
    },
    Failure {
        status: u16,
        headers: HeaderMap,
        parsed_body: Option<JsonValue>,
        raw_text: String,
        latency_ms: u64,
    },
    TransportError {
        timed_out: bool,
        message: String,
        latency_ms: u64,
    },
}

impl UpstreamOutcome {
    pub fn latency_ms(&self) -> u64 {
        match self {
            UpstreamOutcome::Success { latency_ms, .. }
            | UpstreamOutcome::Failure { latency_ms, .. }
            | UpstreamOutcome::TransportError { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn http_failure(status: u16, headers: HeaderMap, raw_text: String, latency_ms: u64) -> Self {
        let parsed_body = serde_json::from_str::<JsonValue>(&raw_text).ok();
        UpstreamOutcome::Failure {
            status,
            headers,
            parsed_body,
            raw_text,
            latency_ms,
        }
    }
}

impl std::fmt::Debug for UpstreamOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamOutcome::Success { latency_ms, .. } => f
                .debug_struct("Success")
                .field("body", &"<stream>")
                .field("latency_ms", latency_ms)
                .finish(),
            UpstreamOutcome::Failure {
                status,
                raw_text,
                latency_ms,
                ..
            } => f
                .debug_struct("Failure")
                .field("status", status)
                .field("raw_text", raw_text)
                .field("latency_ms", latency_ms)
                .finish(),
            UpstreamOutcome::TransportError {
                timed_out,
                message,
                latency_ms,
            } => f
                .debug_struct("TransportError")
                .field("timed_out", timed_out)
                .field("message", message)
                .field("latency_ms", latency_ms)
                .finish(),
        }
    }
}

/// I/O boundary to the provider. Implementations neither classify nor log.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn invoke(&self, call: &UpstreamCall) -> UpstreamOutcome;
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
    url: String,
    api_key: String,
    organization: Option<String>,
}

impl WreqUpstreamClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, wreq::Error> {
        Ok(Self {
            client: build_client(config.proxy.as_deref())?,
            url: config.completions_url(),
            api_key: config.api_key.clone(),
            organization: config.organization.clone(),
        })
    }
}

fn build_client(proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn invoke(&self, call: &UpstreamCall) -> UpstreamOutcome {
        let started_at = Instant::now();
        let elapsed_ms = || started_at.elapsed().as_millis() as u64;

        let payload = match serde_json::to_vec(&call.body()) {
            Ok(payload) => payload,
            Err(err) => {
                return UpstreamOutcome::TransportError {
                    timed_out: false,
                    message: format!("request encoding failed: {err}"),
                    latency_ms: elapsed_ms(),
                };
            }
        };

        let accept = if call.stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        let mut builder = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept);
        if let Some(organization) = &self.organization {
            builder = builder.header("OpenAI-Organization", organization.as_str());
        }

        let deadline = tokio::time::Instant::now() + call.timeout;
        let response = match tokio::time::timeout_at(deadline, builder.body(payload).send()).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return transport_error(&err, elapsed_ms()),
            Err(_) => return deadline_elapsed(call.timeout, elapsed_ms()),
        };

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let raw = match tokio::time::timeout_at(deadline, response.bytes()).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(err)) => return transport_error(&err, elapsed_ms()),
                Err(_) => return deadline_elapsed(call.timeout, elapsed_ms()),
            };
            return UpstreamOutcome::http_failure(
                status.as_u16(),
                headers,
                String::from_utf8_lossy(&raw).into_owned(),
                elapsed_ms(),
            );
        }

        let body = response
            .bytes_stream()
            .map(|item| item.map_err(|err| io::Error::other(err.to_string())));
        UpstreamOutcome::Success {
            headers,
            body: Box::pin(body),
            latency_ms: elapsed_ms(),
        }
    }
}

fn transport_error(err: &wreq::Error, latency_ms: u64) -> UpstreamOutcome {
    UpstreamOutcome::TransportError {
        timed_out: err.is_timeout(),
        message: err.to_string(),
        latency_ms,
    }
}

fn deadline_elapsed(timeout: Duration, latency_ms: u64) -> UpstreamOutcome {
    UpstreamOutcome::TransportError {
        timed_out: true,
        message: format!("no response within {} ms", timeout.as_millis()),
        latency_ms,
    }
}
