//! SSE relay from a successful upstream body to the client.

use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use chatgate_protocol::{DONE_SENTINEL, SseEvent, SseParser};

use crate::classify::{ClassifiedError, classify_transport};
use crate::fallback::FallbackDecision;
use crate::log::RequestLog;
use crate::upstream_client::ByteStream;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const ORIGINAL_MODEL_HEADER: HeaderName = HeaderName::from_static("x-original-model");
pub const SERVED_MODEL_HEADER: HeaderName = HeaderName::from_static("x-served-model");
pub const FALLBACK_REASON_HEADER: HeaderName = HeaderName::from_static("x-fallback-reason");

const RELAY_CHANNEL_CAPACITY: usize = 32;
const FRAME_TERMINATOR: &[u8] = b"\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Upstream finished, or the client went away.
    Normal,
    ErrorPreHeaders,
    ErrorMidStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Relaying,
    Closed(CloseReason),
}

/// Per-response lifecycle. The status is written once, on the first
/// `Open -> Relaying` transition, and never changes afterwards.
#[derive(Debug)]
pub struct StreamSession {
    state: StreamState,
    status: Option<StatusCode>,
    chunks: u64,
    bytes: u64,
    client_disconnected: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            state: StreamState::Open,
            status: None,
            chunks: 0,
            bytes: 0,
            client_disconnected: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn committed_status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn client_disconnected(&self) -> bool {
        self.client_disconnected
    }

    /// Returns `false` when headers were already committed or the session is closed.
    pub fn commit(&mut self, status: StatusCode) -> bool {
        if self.state != StreamState::Open {
            return false;
        }
        self.status = Some(status);
        self.state = StreamState::Relaying;
        true
    }

    pub fn record_chunk(&mut self, len: usize) {
        if self.state == StreamState::Relaying {
            self.chunks += 1;
            self.bytes += len as u64;
        }
    }

    pub fn finish(&mut self, client_disconnected: bool) {
        if self.state == StreamState::Relaying {
            self.client_disconnected = client_disconnected;
            self.state = StreamState::Closed(CloseReason::Normal);
        }
    }

    /// A failure before commit is reported with a status; after commit only
    /// by closing the body.
    pub fn fail(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::Closed(CloseReason::ErrorPreHeaders),
            StreamState::Relaying => StreamState::Closed(CloseReason::ErrorMidStream),
            closed @ StreamState::Closed(_) => closed,
        };
    }
}

/// Correlation and fallback disclosure headers shared by streaming and JSON successes.
pub fn success_headers(request_id: &str, decision: &FallbackDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if decision.attempted {
        if let Ok(value) = HeaderValue::from_str(&decision.original_model) {
            headers.insert(ORIGINAL_MODEL_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&decision.final_model) {
            headers.insert(SERVED_MODEL_HEADER, value);
        }
        if let Some(reason) = decision.reason.as_deref()
            && let Ok(value) = HeaderValue::from_str(reason)
        {
            headers.insert(FALLBACK_REASON_HEADER, value);
        }
    }
    headers
}

pub fn sse_headers(request_id: &str, decision: &FallbackDecision) -> HeaderMap {
    let mut headers = success_headers(request_id, decision);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers
}

/// Pumps `body` into a channel until upstream ends, fails, idles out, or the
/// receiver is dropped. The returned handle yields the closed session.
pub fn spawn_relay(
    mut body: ByteStream,
    mut session: StreamSession,
    log: RequestLog,
    idle_timeout: Duration,
) -> (
    mpsc::Receiver<Result<Bytes, io::Error>>,
    JoinHandle<StreamSession>,
) {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(RELAY_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut saw_done = false;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    session.finish(true);
                    log.stream_complete(session.chunks(), session.bytes(), true);
                    return session;
                }
                next = tokio::time::timeout(idle_timeout, body.next()) => next,
            };

            let failure = match next {
                Ok(Some(Ok(chunk))) => {
                    saw_done |= parser.push_bytes(&chunk).iter().any(SseEvent::is_done);
                    let len = chunk.len();
                    if tx.send(Ok(chunk)).await.is_err() {
                        session.finish(true);
                        log.stream_complete(session.chunks(), session.bytes(), true);
                        return session;
                    }
                    session.record_chunk(len);
                    continue;
                }
                Ok(None) => {
                    // An unterminated tail would swallow the sentinel; close the
                    // frame first so the client dispatches it.
                    let mut tail = Vec::new();
                    if parser.has_pending() {
                        tail.extend_from_slice(FRAME_TERMINATOR);
                        saw_done |= parser
                            .push_bytes(&Bytes::from_static(FRAME_TERMINATOR))
                            .iter()
                            .any(SseEvent::is_done);
                    }
                    if !saw_done {
                        tail.extend_from_slice(DONE_SENTINEL);
                    }
                    let disconnected =
                        !tail.is_empty() && tx.send(Ok(Bytes::from(tail))).await.is_err();
                    session.finish(disconnected);
                    log.stream_complete(session.chunks(), session.bytes(), disconnected);
                    return session;
                }
                Ok(Some(Err(err))) => format!("upstream stream failed: {err}"),
                Err(_) => format!(
                    "no upstream chunk within {} ms",
                    idle_timeout.as_millis()
                ),
            };

            session.fail();
            log.stream_error(session.chunks(), session.bytes(), &failure);
            // Erroring the body makes the server drop the connection instead of
            // ending the chunked response cleanly.
            let _ = tx.send(Err(io::Error::other(failure))).await;
            return session;
        }
    });
    (rx, handle)
}

/// Builds the 200 SSE response and starts relaying. Commits `session`.
pub fn stream_response(
    body: ByteStream,
    mut session: StreamSession,
    log: RequestLog,
    decision: &FallbackDecision,
    idle_timeout: Duration,
) -> Response {
    session.commit(StatusCode::OK);
    let headers = sse_headers(log.request_id(), decision);
    let (rx, _handle) = spawn_relay(body, session, log, idle_timeout);

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().extend(headers);
    response
}

/// Reads a non-streaming upstream body in full, bounded by `deadline`.
pub async fn collect_body(mut body: ByteStream, deadline: Duration) -> Result<Bytes, ClassifiedError> {
    let read = async {
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| classify_transport(false, &err.to_string()))?;
            buffer.extend_from_slice(&chunk);
        }
        Ok::<_, ClassifiedError>(Bytes::from(buffer))
    };
    match tokio::time::timeout(deadline, read).await {
        Ok(result) => result,
        Err(_) => Err(classify_transport(
            true,
            &format!("body not received within {} ms", deadline.as_millis()),
        )),
    }
}
