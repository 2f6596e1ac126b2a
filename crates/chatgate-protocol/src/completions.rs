use serde::{Deserialize, Serialize};

use crate::chat::types::ChatMessage;

/// Request body posted to `{base_url}/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionBody {
    pub model: String,
    /// System prompt first, then the trimmed history.
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    /// Already clamped to the configured ceiling.
    pub max_tokens: u32,
    pub stream: bool,
}
