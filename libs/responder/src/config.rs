use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Chat-completions backend settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            api_key: None,
            model: DEFAULT_MODEL.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: 0.3,
        }
    }
}

impl ResponderConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(base) = env::var("LLM_API_BASE") {
            if !base.trim().is_empty() {
                cfg.api_base = base.trim().trim_end_matches('/').to_string();
            }
        }
        cfg.api_key = env::var("LLM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        if let Ok(model) = env::var("LLM_MODEL") {
            if !model.trim().is_empty() {
                cfg.model = model.trim().to_string();
            }
        }
        if let Ok(secs) = env::var("LLM_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.trim().parse::<u64>() {
                cfg.timeout = Duration::from_secs(parsed.max(1));
            }
        }
        cfg
    }

    /// A responder can only be built when an API key is configured.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
