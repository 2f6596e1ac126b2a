use chatgate_common::GatewayConfig;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
const MAX_TEMPERATURE: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: String,
    /// `None` when fallback is disabled, unconfigured, or would repeat `model`.
    pub fallback: Option<String>,
}

pub fn select_model(requested: Option<&str>, config: &GatewayConfig) -> ModelSelection {
    let model = requested
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(config.default_model.as_str())
        .to_string();
    let fallback = config
        .fallback_model
        .as_deref()
        .map(str::trim)
        .filter(|value| config.fallback_enabled && !value.is_empty() && *value != model)
        .map(str::to_string);
    ModelSelection { model, fallback }
}

pub fn resolve_temperature(requested: Option<f64>) -> f64 {
    match requested {
        Some(value) if value.is_finite() => value.clamp(0.0, MAX_TEMPERATURE),
        _ => DEFAULT_TEMPERATURE,
    }
}

pub fn resolve_max_tokens(requested: Option<i64>, ceiling: u32) -> u32 {
    let ceiling = ceiling.max(1);
    match requested {
        Some(value) if value >= 1 => u32::try_from(value).unwrap_or(ceiling).min(ceiling),
        _ => ceiling,
    }
}

const GENERIC_PROMPT: &str = "You are a helpful AI assistant. Be professional and concise in your responses. When asked about your name, respond naturally and politely.";

/// System prompt for a persona key; unknown or absent keys get the generic one.
pub fn system_prompt(agent: Option<&str>) -> &'static str {
    match agent.map(str::trim) {
        Some("Mr.GYB AI") => {
            "You are Mr.GYB AI, an all-in-one business growth assistant. You specialize in digital marketing, content creation, and business strategy. Be professional, strategic, and focused on growth. When asked about your name, respond naturally and politely."
        }
        Some("Chris" | "CHRIS") => {
            "You are Chris, the CEO AI, focused on high-level strategic planning and business development. Provide executive-level insights and leadership guidance. When asked about your name, respond naturally and politely."
        }
        Some("Sherry") => {
            "You are Sherry, the COO AI, specializing in operations management and process optimization. Focus on efficiency, systems, and operational excellence. When asked about your name, respond naturally and politely."
        }
        Some("Charlotte") => {
            "You are Charlotte, the CHRO AI, expert in human resources and organizational development. Focus on talent management, culture, and employee experience. When asked about your name, respond naturally and politely."
        }
        Some("Jake") => {
            "You are Jake, the CTO AI, specializing in technology strategy and innovation. Provide guidance on technical decisions and digital transformation. When asked about your name, respond naturally and politely."
        }
        Some("Rachel") => {
            "You are Rachel, the CMO AI, expert in marketing strategy and brand development. Focus on marketing campaigns, brand building, and customer engagement. When asked about your name, respond naturally and politely."
        }
        _ => GENERIC_PROMPT,
    }
}
