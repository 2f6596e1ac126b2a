use clap::{ArgAction, Parser};

use chatgate_common::{DEFAULT_FALLBACK_MODEL, GatewayConfigPatch};

#[derive(Parser)]
#[command(name = "chatgate", about = "Streaming chat-completion gateway")]
pub(crate) struct Cli {
    #[arg(long, env = "CHATGATE_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "CHATGATE_PORT", default_value_t = 8787)]
    pub(crate) port: u16,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub(crate) api_key: String,
    #[arg(long, env = "CHATGATE_BASE_URL")]
    pub(crate) base_url: Option<String>,
    #[arg(long, env = "OPENAI_ORGANIZATION")]
    pub(crate) organization: Option<String>,
    #[arg(long, env = "CHATGATE_DEFAULT_MODEL")]
    pub(crate) default_model: Option<String>,
    #[arg(long, env = "CHATGATE_FALLBACK_MODEL", default_value = DEFAULT_FALLBACK_MODEL)]
    pub(crate) fallback_model: String,
    #[arg(long, env = "CHATGATE_FALLBACK_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub(crate) fallback_enabled: bool,
    /// Upper bound on the wait for upstream response headers.
    #[arg(long, env = "CHATGATE_TIMEOUT_MS")]
    pub(crate) timeout_ms: Option<u64>,
    #[arg(long, env = "CHATGATE_MAX_OUTPUT_TOKENS")]
    pub(crate) max_output_tokens: Option<u32>,
    /// Longest silence tolerated between streamed upstream chunks.
    #[arg(long, env = "CHATGATE_STREAM_IDLE_TIMEOUT_MS")]
    pub(crate) stream_idle_timeout_ms: Option<u64>,
    #[arg(long, env = "CHATGATE_PROXY")]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> GatewayConfigPatch {
        GatewayConfigPatch {
            host: Some(self.host),
            port: Some(self.port),
            api_key: Some(self.api_key),
            base_url: self.base_url,
            organization: self.organization,
            default_model: self.default_model,
            fallback_model: Some(self.fallback_model),
            fallback_enabled: Some(self.fallback_enabled),
            timeout_ms: self.timeout_ms,
            max_output_tokens: self.max_output_tokens,
            stream_idle_timeout_ms: self.stream_idle_timeout_ms,
            proxy: self.proxy,
        }
    }
}
