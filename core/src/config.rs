//! Environment-driven transport configuration.

use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:4000";
const PRODUCTION_TIMEOUT: Duration = Duration::from_millis(12_000);
const DEBUG_TIMEOUT: Duration = Duration::from_millis(20_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Process-wide settings read from `API_URL`, `API_HOST`,
/// `API_FORWARDED_HOST`, `DEBUG` and `APP_ENV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub api_url: String,
    pub host_override: Option<String>,
    pub forwarded_host: Option<String>,
    pub debug: bool,
    pub environment: Environment,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            host_override: None,
            forwarded_host: None,
            debug: false,
            environment: Environment::Production,
        }
    }
}

impl TransportConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let environment = match get("APP_ENV").as_deref() {
            Some("development") => Environment::Development,
            _ => Environment::Production,
        };
        let debug = get("DEBUG").is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        });
        Self {
            api_url: get("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            host_override: get("API_HOST"),
            forwarded_host: get("API_FORWARDED_HOST"),
            debug,
            environment,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Per-attempt timeout used when a request doesn't set its own.
    pub fn default_timeout(&self) -> Duration {
        if self.debug || self.is_development() {
            DEBUG_TIMEOUT
        } else {
            PRODUCTION_TIMEOUT
        }
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.debug || self.environment != Environment::Production
    }
}
