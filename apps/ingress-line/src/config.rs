//! Environment-driven settings for the LINE ingress service.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use csd_autoreply::AutoReplyConfig;
use csd_idempotency::IdempotencyConfig;
use csd_responder::ResponderConfig;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_DATA_PATH: &str = "data/db.json";
pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 12;
pub const PROFILE_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a socket address: {value}")]
    InvalidAddress { name: &'static str, value: String },
    #[error("{name} must be true or false, got {value}")]
    InvalidFlag { name: &'static str, value: String },
    #[error("{name} must be a positive number of seconds, got {value}")]
    InvalidSeconds { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub bind: SocketAddr,
    pub data_path: PathBuf,
    pub knowledge_path: Option<PathBuf>,
    pub line_api_base: String,
    pub platform_timeout: Duration,
    pub verify_signatures: bool,
    pub admin_token: Option<String>,
    pub profile_max_age: time::Duration,
    pub idempotency: IdempotencyConfig,
    pub autoreply: AutoReplyConfig,
    pub responder: ResponderConfig,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            knowledge_path: None,
            line_api_base: DEFAULT_LINE_API_BASE.into(),
            platform_timeout: Duration::from_secs(DEFAULT_PLATFORM_TIMEOUT_SECS),
            verify_signatures: true,
            admin_token: None,
            profile_max_age: time::Duration::hours(PROFILE_MAX_AGE_HOURS),
            idempotency: IdempotencyConfig::default(),
            autoreply: AutoReplyConfig::default(),
            responder: ResponderConfig::default(),
        }
    }
}

impl IngressConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        let bind = non_empty("BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        cfg.bind = bind.parse().map_err(|_| ConfigError::InvalidAddress {
            name: "BIND",
            value: bind.clone(),
        })?;
        if let Some(path) = non_empty("DATA_PATH") {
            cfg.data_path = PathBuf::from(path);
        }
        cfg.knowledge_path = non_empty("KNOWLEDGE_PATH").map(PathBuf::from);
        if let Some(base) = non_empty("LINE_API_BASE") {
            cfg.line_api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(raw) = non_empty("PLATFORM_TIMEOUT_SECS") {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::InvalidSeconds {
                    name: "PLATFORM_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
            cfg.platform_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = non_empty("VERIFY_SIGNATURES") {
            cfg.verify_signatures = parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                name: "VERIFY_SIGNATURES",
                value: raw.clone(),
            })?;
        }
        cfg.admin_token = non_empty("ADMIN_TOKEN");

        cfg.idempotency = IdempotencyConfig::from_env();
        cfg.autoreply = AutoReplyConfig::from_env();
        cfg.responder = ResponderConfig::from_env();
        Ok(cfg)
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: &[&str] = &[
        "BIND",
        "DATA_PATH",
        "KNOWLEDGE_PATH",
        "LINE_API_BASE",
        "PLATFORM_TIMEOUT_SECS",
        "VERIFY_SIGNATURES",
        "ADMIN_TOKEN",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear() {
        for var in VARS {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    fn defaults_apply_without_env() {
        let _guard = env_lock().lock().unwrap();
        clear();
        let cfg = IngressConfig::from_env().expect("config");
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
        assert_eq!(cfg.data_path, PathBuf::from(DEFAULT_DATA_PATH));
        assert!(cfg.verify_signatures);
        assert!(cfg.admin_token.is_none());
        assert!(cfg.knowledge_path.is_none());
        assert_eq!(cfg.line_api_base, DEFAULT_LINE_API_BASE);
    }

    #[test]
    fn overrides_are_read() {
        let _guard = env_lock().lock().unwrap();
        clear();
        unsafe {
            env::set_var("BIND", "127.0.0.1:9000");
            env::set_var("VERIFY_SIGNATURES", "off");
            env::set_var("ADMIN_TOKEN", "s3cret");
            env::set_var("LINE_API_BASE", "http://localhost:9999/");
            env::set_var("PLATFORM_TIMEOUT_SECS", "3");
        }
        let cfg = IngressConfig::from_env().expect("config");
        clear();
        assert_eq!(cfg.bind.port(), 9000);
        assert!(!cfg.verify_signatures);
        assert_eq!(cfg.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.line_api_base, "http://localhost:9999");
        assert_eq!(cfg.platform_timeout, Duration::from_secs(3));
    }

    #[test]
    fn bad_values_are_rejected() {
        let _guard = env_lock().lock().unwrap();
        clear();
        unsafe { env::set_var("VERIFY_SIGNATURES", "sometimes") };
        let err = IngressConfig::from_env().unwrap_err();
        clear();
        assert!(matches!(err, ConfigError::InvalidFlag { .. }));

        unsafe { env::set_var("BIND", "not-an-addr") };
        let err = IngressConfig::from_env().unwrap_err();
        clear();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }
}
