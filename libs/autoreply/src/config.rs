use std::env;

use time::Duration;
use tracing::warn;

pub const DEFAULT_FALLBACK_MINUTES: i64 = 10;
/// Longest accepted fallback window (one week).
pub const MAX_FALLBACK_MINUTES: i64 = 7 * 24 * 60;
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
pub const DEFAULT_KNOWLEDGE_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct AutoReplyConfig {
    /// Human inactivity after which a manual conversation returns to automatic mode.
    pub fallback_after: Duration,
    pub history_window: usize,
    /// When off, generated replies are kept as internal drafts and never pushed to the platform.
    pub auto_send_replies: bool,
    pub knowledge_top_k: usize,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            fallback_after: Duration::minutes(DEFAULT_FALLBACK_MINUTES),
            history_window: DEFAULT_HISTORY_WINDOW,
            auto_send_replies: false,
            knowledge_top_k: DEFAULT_KNOWLEDGE_TOP_K,
        }
    }
}

impl AutoReplyConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(minutes) = env::var("MANUAL_FALLBACK_MINUTES") {
            if let Ok(parsed) = minutes.trim().parse::<i64>() {
                cfg.fallback_after = Duration::minutes(parsed.clamp(0, MAX_FALLBACK_MINUTES));
                if parsed > MAX_FALLBACK_MINUTES {
                    warn!(requested = parsed, applied = MAX_FALLBACK_MINUTES, "MANUAL_FALLBACK_MINUTES clamped");
                }
            }
        }
        if let Ok(flag) = env::var("AUTO_SEND_REPLIES") {
            match parse_bool(&flag) {
                Some(enabled) => cfg.auto_send_replies = enabled,
                None => warn!(value = %flag, "AUTO_SEND_REPLIES is not a boolean; replies stay drafts"),
            }
        }
        if let Ok(window) = env::var("HISTORY_WINDOW") {
            if let Ok(parsed) = window.trim().parse::<usize>() {
                cfg.history_window = parsed.max(1);
            }
        }
        if let Ok(top_k) = env::var("KNOWLEDGE_TOP_K") {
            if let Ok(parsed) = top_k.trim().parse::<usize>() {
                cfg.knowledge_top_k = parsed;
            }
        }
        cfg
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
