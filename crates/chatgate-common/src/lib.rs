use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_FALLBACK_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2_048;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
    #[error("invalid config field {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Final, merged configuration used by the running gateway.
///
/// Built once at startup and shared read-only by every request task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for the upstream provider.
    pub api_key: String,
    /// Provider base URL; `/chat/completions` is appended per call.
    pub base_url: String,
    pub organization: Option<String>,
    pub default_model: String,
    pub fallback_model: Option<String>,
    pub fallback_enabled: bool,
    pub timeout_ms: u64,
    /// Ceiling applied to `max_tokens` before it is sent upstream.
    pub max_output_tokens: u32,
    pub stream_idle_timeout_ms: u64,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
}

impl GatewayConfig {
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Optional layer used for merging gateway config.
///
/// Merge order: defaults < environment < CLI flags; later overlays win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub default_model: Option<String>,
    pub fallback_model: Option<String>,
    pub fallback_enabled: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub max_output_tokens: Option<u32>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub proxy: Option<String>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.organization.is_some() {
            self.organization = other.organization;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.fallback_model.is_some() {
            self.fallback_model = other.fallback_model;
        }
        if other.fallback_enabled.is_some() {
            self.fallback_enabled = other.fallback_enabled;
        }
        if other.timeout_ms.is_some() {
            self.timeout_ms = other.timeout_ms;
        }
        if other.max_output_tokens.is_some() {
            self.max_output_tokens = other.max_output_tokens;
        }
        if other.stream_idle_timeout_ms.is_some() {
            self.stream_idle_timeout_ms = other.stream_idle_timeout_ms;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let api_key = non_empty(self.api_key).ok_or(ConfigError::MissingField("api_key"))?;
        let base_url = non_empty(self.base_url).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "base_url",
                reason: "must be an http(s) url",
            });
        }
        let timeout_ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms",
                reason: "must be greater than zero",
            });
        }
        let max_output_tokens = self.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        if max_output_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "max_output_tokens",
                reason: "must be greater than zero",
            });
        }

        Ok(GatewayConfig {
            host: non_empty(self.host).unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(8787),
            api_key,
            base_url,
            organization: non_empty(self.organization),
            default_model: non_empty(self.default_model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_model: non_empty(self.fallback_model),
            fallback_enabled: self.fallback_enabled.unwrap_or(true),
            timeout_ms,
            max_output_tokens,
            stream_idle_timeout_ms: self
                .stream_idle_timeout_ms
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_MS),
            proxy: non_empty(self.proxy),
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            api_key: Some(value.api_key),
            base_url: Some(value.base_url),
            organization: value.organization,
            default_model: Some(value.default_model),
            fallback_model: value.fallback_model,
            fallback_enabled: Some(value.fallback_enabled),
            timeout_ms: Some(value.timeout_ms),
            max_output_tokens: Some(value.max_output_tokens),
            stream_idle_timeout_ms: Some(value.stream_idle_timeout_ms),
            proxy: value.proxy,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key() -> GatewayConfigPatch {
        GatewayConfigPatch {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let config = with_key().into_config().unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(config.fallback_enabled);
        assert_eq!(config.fallback_model, None);
        assert_eq!(config.completions_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = GatewayConfigPatch::default().into_config().unwrap_err();
        assert_eq!(err, ConfigError::MissingField("api_key"));

        let blank = GatewayConfigPatch {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            blank.into_config().unwrap_err(),
            ConfigError::MissingField("api_key")
        );
    }

    #[test]
    fn later_overlay_wins() {
        let mut base = with_key();
        base.default_model = Some("a".to_string());
        base.timeout_ms = Some(1_000);
        base.overlay(GatewayConfigPatch {
            default_model: Some("b".to_string()),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.default_model, "b");
        assert_eq!(config.timeout_ms, 1_000);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let mut patch = with_key();
        patch.timeout_ms = Some(0);
        assert!(matches!(
            patch.into_config(),
            Err(ConfigError::Invalid {
                field: "timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn completions_url_tolerates_trailing_slash() {
        let mut patch = with_key();
        patch.base_url = Some("http://127.0.0.1:9000/v1/".to_string());
        let config = patch.into_config().unwrap();
        assert_eq!(config.completions_url(), "http://127.0.0.1:9000/v1/chat/completions");
    }
}
