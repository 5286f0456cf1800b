//! Application configuration loaded from environment variables.

use std::time::Duration;

use topup::{CompensationPolicy, OrchestratorConfig};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory ledger
/// - `TOPUP_CACHE_TTL_SECS`: lifetime of cached topup reads (default: `300`)
/// - `TOPUP_REVERT_BALANCE_ON_LATE_FAILURE`: undo the balance change when
///   a step after the balance write fails (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub cache_ttl: Duration,
    pub revert_balance_on_late_failure: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            cache_ttl: lookup("TOPUP_CACHE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            revert_balance_on_late_failure: lookup("TOPUP_REVERT_BALANCE_ON_LATE_FAILURE")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.revert_balance_on_late_failure),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the orchestrator settings this configuration selects.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            compensation: if self.revert_balance_on_late_failure {
                CompensationPolicy::RevertBalance
            } else {
                CompensationPolicy::KeepBalance
            },
            cache_ttl: self.cache_ttl,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            cache_ttl: Duration::from_secs(300),
            revert_balance_on_late_failure: false,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
