use chatgate_protocol::{ChatMessage, ChatRequestBody, RawMessage, Role};

/// Number of most recent messages forwarded upstream.
pub const CONTEXT_WINDOW: usize = 12;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("messages must be a non-empty array")]
    MissingMessages,
    #[error("every message was empty after trimming")]
    NoContent,
}

/// A validated request, owned by the task serving it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub request_id: String,
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub agent: Option<String>,
    pub stream: bool,
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
}

pub fn normalize_request(
    body: ChatRequestBody,
    request_id: String,
) -> Result<ChatRequest, NormalizeError> {
    let messages = normalize_messages(body.messages.as_deref())?;
    Ok(ChatRequest {
        request_id,
        messages,
        model: body.model,
        temperature: body.temperature,
        max_tokens: body.max_tokens,
        agent: body.agent,
        stream: body.stream.unwrap_or(true),
        user_id: body.user_id,
        chat_id: body.chat_id,
    })
}

/// Coerces roles, trims content, drops empties and keeps the last
/// [`CONTEXT_WINDOW`] messages in their original order.
pub fn normalize_messages(raw: Option<&[RawMessage]>) -> Result<Vec<ChatMessage>, NormalizeError> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(NormalizeError::MissingMessages),
    };

    let mut messages: Vec<ChatMessage> = raw
        .iter()
        .filter_map(|message| {
            let content = message.content_str()?.trim();
            if content.is_empty() {
                return None;
            }
            Some(ChatMessage::new(
                Role::coerce(message.role.as_deref()),
                content,
            ))
        })
        .collect();

    if messages.is_empty() {
        return Err(NormalizeError::NoContent);
    }
    if messages.len() > CONTEXT_WINDOW {
        messages.drain(..messages.len() - CONTEXT_WINDOW);
    }
    Ok(messages)
}
