use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the recorder's REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the live progress WebSocket endpoint.
    #[serde(default = "default_events_path")]
    pub events_path: String,
}

impl ServerConfig {
    /// Derive the WebSocket URL from the REST base URL.
    pub fn ws_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", base)
        };
        format!("{}{}", ws_base, self.events_path)
    }
}

/// Backoff policy for re-establishing the live channel after a drop.
/// Exponential doubling from `initial_delay_ms` capped at `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a cached progress record for a fully released streamer
    /// survives before the reaper drops it.
    #[serde(default = "default_cleanup_grace_secs")]
    pub cleanup_grace_secs: u64,
    /// Capacity of the store's change-notification channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl StoreConfig {
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            events_path: default_events_path(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_grace_secs: default_cleanup_grace_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            reconnect: ReconnectConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:12555".to_string()
}

fn default_events_path() -> String {
    "/live/events".to_string()
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_cleanup_grace_secs() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    256
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.base_url, "http://127.0.0.1:12555");
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.store.cleanup_grace_secs, 30);
    }

    #[test]
    fn test_ws_url_derivation() {
        let server = ServerConfig {
            base_url: "http://rec.local:12555/".into(),
            events_path: "/live/events".into(),
        };
        assert_eq!(server.ws_url(), "ws://rec.local:12555/live/events");

        let tls = ServerConfig {
            base_url: "https://rec.example.com".into(),
            events_path: "/live/events".into(),
        };
        assert_eq!(tls.ws_url(), "wss://rec.example.com/live/events");
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            base_url = "http://10.0.0.5:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.base_url, "http://10.0.0.5:9000");
        assert_eq!(config.server.events_path, "/live/events");
        assert_eq!(config.store.cleanup_grace_secs, 30);
    }
}
