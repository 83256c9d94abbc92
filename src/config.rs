//! Configuration for the relay service.
//!
//! All settings come from environment variables with defaults; only the
//! LLM backend endpoint and API key are required.

use crate::error::{Error, Result};

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub backend: BackendConfig,
    pub relay: RelayConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Shared store (Redis) connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl StoreConfig {
    /// Connection URL in the form `redis://host:port/db`.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// LLM backend settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Relay policy settings: TTL, ceilings, rates, callback timeout.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Context record time-to-live in seconds.
    pub context_ttl_secs: u64,
    /// Per-callback-URL request ceiling within one TTL window.
    pub context_max_requests: i64,
    /// Per-source-address requests per minute.
    pub requests_per_minute: u32,
    /// Callback dispatch timeout in seconds.
    pub callback_timeout_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            store: StoreConfig {
                host: "localhost".to_string(),
                port: 6379,
                db: 0,
            },
            backend: BackendConfig {
                api_url: String::new(),
                api_key: String::new(),
                model: "gpt-3.5-turbo".to_string(),
                timeout_secs: 30,
            },
            relay: RelayConfig {
                context_ttl_secs: 3600,
                context_max_requests: 100,
                requests_per_minute: 5,
                callback_timeout_secs: 10,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// `LLM_API_URL` and `LLM_API_KEY` are required; everything else has a
    /// default.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("RELAY_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAY_PORT") {
            config.server.port = parse_var("RELAY_PORT", &port)?;
        }

        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.store.host = host;
        }
        if let Ok(port) = std::env::var("REDIS_PORT") {
            config.store.port = parse_var("REDIS_PORT", &port)?;
        }
        if let Ok(db) = std::env::var("REDIS_DB") {
            config.store.db = parse_var("REDIS_DB", &db)?;
        }

        config.backend.api_url = std::env::var("LLM_API_URL")
            .map_err(|_| Error::Config("LLM_API_URL is not set".to_string()))?;
        config.backend.api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| Error::Config("LLM_API_KEY is not set".to_string()))?;
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.backend.model = model;
        }
        if let Ok(secs) = std::env::var("LLM_TIMEOUT_SECS") {
            config.backend.timeout_secs = parse_var("LLM_TIMEOUT_SECS", &secs)?;
        }

        if let Ok(secs) = std::env::var("CONTEXT_TTL_SECS") {
            config.relay.context_ttl_secs = parse_var("CONTEXT_TTL_SECS", &secs)?;
        }
        if let Ok(max) = std::env::var("CONTEXT_MAX_REQUESTS") {
            config.relay.context_max_requests = parse_var("CONTEXT_MAX_REQUESTS", &max)?;
        }
        if let Ok(rate) = std::env::var("RATE_LIMIT_PER_MINUTE") {
            config.relay.requests_per_minute = parse_var("RATE_LIMIT_PER_MINUTE", &rate)?;
        }
        if let Ok(secs) = std::env::var("CALLBACK_TIMEOUT_SECS") {
            config.relay.callback_timeout_secs = parse_var("CALLBACK_TIMEOUT_SECS", &secs)?;
        }

        if let Ok(level) = std::env::var("RELAY_LOG_LEVEL") {
            config.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("RELAY_LOG_FORMAT") {
            config.observability.log_format = format;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, value)))
}
