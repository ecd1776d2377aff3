use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::client::registry::FailurePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API root; relative values are resolved against `origin`
    pub base_url: String,
    pub origin: String,
    pub timeout_secs: u64,
    pub tenant_header: String,
    pub login_path: String,
    pub logout_path: String,
    pub refresh_path: String,
    pub token_status_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retry: u32,
    pub reset_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_skew_secs: i64,
    pub auto_refresh: bool,
    pub idle_poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub debug_logging: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid API base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "/api".to_string(),
            origin: "http://localhost:5173".to_string(),
            timeout_secs: 30,
            tenant_header: "X-Tenant-Id".to_string(),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            token_status_path: "/auth/token-status".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            reset_window_secs: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_skew_secs: 30,
            auto_refresh: false,
            idle_poll_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { debug_logging: true }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        // An explicit config file replaces the profile defaults
        let base = match env::var("CONSOLE_CONFIG") {
            Ok(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring config file {}: {}", path, e);
                    Self::for_environment(environment)
                }
            },
            Err(_) => Self::for_environment(environment),
        };

        base.with_env_overrides()
    }

    /// Log verbosity known before the full config is loaded:
    /// `CONSOLE_DEBUG_LOGGING`, else the `APP_ENV` profile default. Lets the
    /// binary install its subscriber first, so config loading can log.
    pub fn debug_logging_from_env() -> bool {
        env::var("CONSOLE_DEBUG_LOGGING")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| Self::for_environment(Environment::from_env()).logging.debug_logging)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    fn with_env_overrides(mut self) -> Self {
        // Same variables the browser build reads, proxy first
        if let Some(v) = non_empty_var("VITE_API_PROXY").or_else(|| non_empty_var("VITE_API_URL")) {
            self.api.base_url = v;
        }
        if let Some(v) = non_empty_var("CONSOLE_API_ORIGIN") {
            self.api.origin = v;
        }
        if let Ok(v) = env::var("CONSOLE_REQUEST_TIMEOUT_SECS") {
            self.api.timeout_secs = v.parse().unwrap_or(self.api.timeout_secs);
        }
        if let Some(v) = non_empty_var("CONSOLE_TENANT_HEADER") {
            self.api.tenant_header = v;
        }

        if let Ok(v) = env::var("CONSOLE_MAX_RETRY") {
            self.retry.max_retry = v.parse().unwrap_or(self.retry.max_retry);
        }
        if let Ok(v) = env::var("CONSOLE_RETRY_RESET_WINDOW_SECS") {
            self.retry.reset_window_secs = v.parse().unwrap_or(self.retry.reset_window_secs);
        }

        if let Ok(v) = env::var("CONSOLE_REFRESH_SKEW_SECS") {
            self.session.refresh_skew_secs = v.parse().unwrap_or(self.session.refresh_skew_secs);
        }
        if let Ok(v) = env::var("CONSOLE_AUTO_REFRESH") {
            self.session.auto_refresh = v.parse().unwrap_or(self.session.auto_refresh);
        }

        if let Ok(v) = env::var("CONSOLE_DEBUG_LOGGING") {
            self.logging.debug_logging = v.parse().unwrap_or(self.logging.debug_logging);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig { debug_logging: true },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            api: ApiConfig {
                origin: "https://staging.example.com".to_string(),
                ..ApiConfig::default()
            },
            retry: RetryConfig::default(),
            session: SessionConfig {
                auto_refresh: true,
                ..SessionConfig::default()
            },
            logging: LoggingConfig { debug_logging: false },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            api: ApiConfig {
                origin: "https://console.example.com".to_string(),
                ..ApiConfig::default()
            },
            retry: RetryConfig::default(),
            session: SessionConfig {
                auto_refresh: true,
                refresh_skew_secs: 60,
                ..SessionConfig::default()
            },
            logging: LoggingConfig { debug_logging: false },
        }
    }

    /// Absolute API root: `base_url` as is when absolute, otherwise joined
    /// onto `origin`
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        let base = self.api.base_url.trim();
        let candidate = if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!(
                "{}/{}",
                self.api.origin.trim_end_matches('/'),
                base.trim_start_matches('/')
            )
        };

        Url::parse(&candidate).map_err(|source| ConfigError::BaseUrl {
            url: candidate,
            source,
        })
    }

    /// Paths that must not wait on a token refresh
    pub fn auth_paths(&self) -> [&str; 3] {
        [
            self.api.login_path.as_str(),
            self.api.refresh_path.as_str(),
            self.api.token_status_path.as_str(),
        ]
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            max_failures: self.retry.max_retry,
            reset_window: Duration::from_secs(self.retry.reset_window_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.refresh_skew_secs)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<ClientConfig> = Lazy::new(ClientConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static ClientConfig {
    &CONFIG
}
