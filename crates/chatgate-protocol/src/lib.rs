//! Wire types for the chat gateway.
//!
//! `chat` holds what clients send to `POST /chat`; `completions` holds what the
//! gateway sends to the upstream provider. Neither module validates: trimming,
//! role coercion and clamping live in `chatgate-core`.

pub mod chat;
pub mod completions;
pub mod sse;

pub use chat::request::{ChatRequestBody, RawMessage};
pub use chat::types::{ChatMessage, Role};
pub use completions::ChatCompletionBody;
pub use sse::{DONE_SENTINEL, SseEvent, SseParser};
