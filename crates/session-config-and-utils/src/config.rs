//! Configuration management for the session runtime.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default business API base URL (can be overridden at compile time via RECIPE_API_URL).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("RECIPE_API_URL") {
    Some(url) => url,
    None => "https://api.recipes.example.com",
};

/// Default realtime endpoint (can be overridden at compile time via RECIPE_REALTIME_URL).
pub const DEFAULT_REALTIME_URL: &str = match option_env!("RECIPE_REALTIME_URL") {
    Some(url) => url,
    None => "wss://api.recipes.example.com/ws",
};

/// JSON key that carries the topic of inbound realtime messages.
pub const DEFAULT_TOPIC_KEY: &str = "recipeId";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Token refresh retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Backend calls per refresh attempt before a transient failure is reported.
    pub max_attempts: u32,
    /// Delay before the second call in milliseconds; doubles afterwards.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

/// Realtime channel reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Reconnect automatically after an unexpected drop.
    pub auto_reconnect: bool,
    /// Base reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Maximum reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Consecutive reconnect attempts before giving up until the next connect().
    pub max_reconnect_attempts: u32,
    /// Keepalive ping period in milliseconds. Zero disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Server silence in milliseconds after which the connection is dropped.
    pub idle_timeout_ms: u64,
    /// Milliseconds to wait for the server to finish a close.
    pub close_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_base_delay_ms: 2_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            idle_timeout_ms: 75_000,
            close_timeout_ms: 5_000,
        }
    }
}

/// Reachability probing used when no platform connectivity callback exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` probed with a TCP connect. Derived from the API URL when absent.
    pub probe_addr: Option<String>,
    /// Interval between probes in milliseconds.
    pub probe_interval_ms: u64,
    /// Timeout of a single probe in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_addr: None,
            probe_interval_ms: 5_000,
            probe_timeout_ms: 2_000,
        }
    }
}

/// Main session runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the business and auth API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Realtime WebSocket endpoint.
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    /// JSON key used to demultiplex inbound realtime messages.
    #[serde(default = "default_topic_key")]
    pub topic_key: String,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_realtime_url() -> String {
    DEFAULT_REALTIME_URL.to_string()
}

fn default_topic_key() -> String {
    DEFAULT_TOPIC_KEY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            realtime_url: default_realtime_url(),
            topic_key: default_topic_key(),
            refresh: RefreshSettings::default(),
            realtime: RealtimeConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(log_level) = env_override("RECIPE_SESSION_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(url) = env_override("RECIPE_SESSION_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = env_override("RECIPE_SESSION_REALTIME_URL") {
            self.realtime_url = url;
        }
    }

    /// Check URLs and retry bounds.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_base_url()?;
        let realtime = self.realtime_url()?;
        if !matches!(realtime.scheme(), "ws" | "wss") {
            return Err(CoreError::Config(format!(
                "realtime_url must use ws or wss, got {}",
                realtime.scheme()
            )));
        }
        if self.refresh.max_attempts == 0 {
            return Err(CoreError::Config(
                "refresh.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.topic_key.trim().is_empty() {
            return Err(CoreError::Config("topic_key must not be empty".to_string()));
        }
        let policy = &self.realtime;
        if policy.heartbeat_interval_ms > 0
            && policy.idle_timeout_ms <= policy.heartbeat_interval_ms
        {
            return Err(CoreError::Config(
                "realtime.idle_timeout_ms must exceed realtime.heartbeat_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed API base URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }

    /// Parsed realtime URL.
    pub fn realtime_url(&self) -> CoreResult<Url> {
        Url::parse(&self.realtime_url).map_err(CoreError::from)
    }

    /// Address probed for reachability: explicit `probe_addr`, otherwise the
    /// API host with its known port.
    pub fn probe_addr(&self) -> CoreResult<String> {
        if let Some(addr) = &self.connectivity.probe_addr {
            return Ok(addr.clone());
        }
        let url = self.api_base_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| CoreError::Config("api_base_url has no host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| CoreError::Config("api_base_url has no port".to_string()))?;
        Ok(format!("{}:{}", host, port))
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.realtime_url, DEFAULT_REALTIME_URL);
        assert_eq!(config.topic_key, "recipeId");
        assert_eq!(config.refresh.max_attempts, 3);
        assert_eq!(config.refresh.initial_delay_ms, 500);
        assert_eq!(config.refresh.max_delay_ms, 5000);
        assert!(config.realtime.auto_reconnect);
        assert_eq!(config.realtime.heartbeat_interval_ms, 30_000);
        assert_eq!(config.realtime.close_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "refresh": { "max_attempts": 5 }
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.refresh.max_attempts, 5);
        assert_eq!(config.refresh.initial_delay_ms, 500);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.api_base_url = "https://staging.recipes.example.com".to_string();
        config.realtime.max_reconnect_attempts = 3;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.api_base_url, "https://staging.recipes.example.com");
        assert_eq!(loaded.realtime.max_reconnect_attempts, 3);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.topic_key, DEFAULT_TOPIC_KEY);
    }

    #[test]
    fn test_validate_rejects_http_realtime_url() {
        let mut config = Config::default();
        config.realtime_url = "https://api.recipes.example.com/ws".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_idle_timeout_within_heartbeat() {
        let mut config = Config::default();
        config.realtime.heartbeat_interval_ms = 10_000;
        config.realtime.idle_timeout_ms = 10_000;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        config.realtime.heartbeat_interval_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_refresh_attempts() {
        let mut config = Config::default();
        config.refresh.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_api_url() {
        let mut config = Config::default();
        config.api_base_url = "not a valid url".to_string();
        assert!(config.api_base_url().is_err());
    }

    #[test]
    fn test_probe_addr_derived_from_api_url() {
        let mut config = Config::default();
        config.api_base_url = "https://api.recipes.example.com/v1".to_string();
        assert_eq!(config.probe_addr().unwrap(), "api.recipes.example.com:443");

        config.connectivity.probe_addr = Some("10.0.0.1:8080".to_string());
        assert_eq!(config.probe_addr().unwrap(), "10.0.0.1:8080");
    }
}
