//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Upstream Perplexity API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Usage-analytics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Where the usage snapshot is persisted.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Pre-shared credential for `POST /api/usage/import`. When unset, the
    /// import endpoint accepts unauthenticated requests.
    #[serde(default)]
    pub import_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            import_token: None,
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_snapshot_path() -> String {
    "data/usage.json".to_string()
}

impl RelayConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SONAR_RELAY_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: RelayConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SONAR_RELAY_").split("__"))
            .extract()?;

        // Direct env var override for the upstream credential
        if let Ok(key) = std::env::var("PERPLEXITY_API_KEY") {
            config.upstream.api_key = key;
        }

        Ok(config)
    }
}
