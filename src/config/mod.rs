//! Configuration management
//!
//! Layered: `config/default.toml`, then `config/{env}.toml`, then
//! `MENTORCALL__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "MENTORCALL";

/// Public STUN servers used for every peer connection
pub const DEFAULT_STUN_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Upper bound for the placeholder video clock
pub const MAX_SYNTHETIC_FRAME_RATE: u32 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub call: CallConfig,
    pub media: MediaConfig,
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// In-memory store is used when unset
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 5,
        }
    }
}

/// Peer connection implementation used by `demo` mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerBackend {
    /// In-process connections, no network
    #[default]
    Simulated,
    /// webrtc-rs over UDP
    Webrtc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub peer_backend: PeerBackend,
    pub stun_servers: Vec<String>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub ready_timeout_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            peer_backend: PeerBackend::default(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            max_retries: 3,
            retry_backoff_ms: 2000,
            ready_timeout_ms: 5000,
        }
    }
}

impl CallConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing_mode: String,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub synthetic_width: u32,
    pub synthetic_height: u32,
    pub synthetic_frame_rate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing_mode: "user".to_string(),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            synthetic_width: 640,
            synthetic_height: 480,
            synthetic_frame_rate: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket hub used by remote clients, e.g. `ws://host:8080/realtime`
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings for the environment named by `MENTORCALL_ENV`
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("MENTORCALL_ENV").unwrap_or_else(|_| "development".to_string());
        Self::load_from("config", &env)
    }

    pub fn load_from(dir: &str, env: &str) -> Result<Self, ConfigError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("{}/default", dir)).required(false))
            .add_source(config::File::with_name(&format!("{}/{}", dir, env)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must be non-zero"));
        }
        for url in &self.call.stun_servers {
            if url.starts_with("turn:") || url.starts_with("turns:") {
                return Err(ConfigError::invalid(
                    "call.stun_servers",
                    format!("TURN relays are not supported: {}", url),
                ));
            }
            if !url.starts_with("stun:") {
                return Err(ConfigError::invalid(
                    "call.stun_servers",
                    format!("expected a stun: URL, got {}", url),
                ));
            }
        }
        if self.call.stun_servers.len() != DEFAULT_STUN_SERVERS.len() {
            return Err(ConfigError::invalid(
                "call.stun_servers",
                format!(
                    "exactly {} STUN servers are required, got {}",
                    DEFAULT_STUN_SERVERS.len(),
                    self.call.stun_servers.len()
                ),
            ));
        }
        if self.call.retry_backoff_ms == 0 {
            return Err(ConfigError::invalid(
                "call.retry_backoff_ms",
                "must be non-zero",
            ));
        }
        if self.media.synthetic_width == 0 || self.media.synthetic_height == 0 {
            return Err(ConfigError::invalid(
                "media.synthetic_width",
                "placeholder dimensions must be non-zero",
            ));
        }
        if !(1..=MAX_SYNTHETIC_FRAME_RATE).contains(&self.media.synthetic_frame_rate) {
            return Err(ConfigError::invalid(
                "media.synthetic_frame_rate",
                format!("must be between 1 and {}", MAX_SYNTHETIC_FRAME_RATE),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::invalid(
                "database.min_connections",
                "must not exceed max_connections",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.call.stun_servers.len(), 3);
        assert_eq!(settings.call.max_retries, 3);
        assert_eq!(settings.call.retry_backoff(), Duration::from_secs(2));
        assert_eq!(settings.server.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_rejects_turn_servers() {
        let mut settings = Settings::default();
        settings.call.stun_servers[2] = "turn:relay.example.com:3478".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "call.stun_servers"
        ));
    }

    #[test]
    fn test_requires_three_stun_servers() {
        let mut settings = Settings::default();
        settings.call.stun_servers.pop();
        assert!(settings.validate().is_err());

        settings.call.stun_servers = vec![
            "stun:a.example.com:3478".to_string(),
            "stun:b.example.com:3478".to_string(),
            "stun:c.example.com:3478".to_string(),
            "stun:d.example.com:3478".to_string(),
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_placeholder_size() {
        let mut settings = Settings::default();
        settings.media.synthetic_height = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "media.synthetic_width"
        ));
    }

    #[test]
    fn test_placeholder_frame_rate_bounds() {
        let mut settings = Settings::default();
        settings.media.synthetic_frame_rate = 0;
        assert!(settings.validate().is_err());

        settings.media.synthetic_frame_rate = 2_000_000;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "media.synthetic_frame_rate"
        ));

        settings.media.synthetic_frame_rate = MAX_SYNTHETIC_FRAME_RATE;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_backoff() {
        let mut settings = Settings::default();
        settings.call.retry_backoff_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let settings = Settings::load_from("does-not-exist", "test").unwrap();
        assert_eq!(settings.media.ideal_width, 1280);
        assert_eq!(settings.logging.filter, "info");
        assert_eq!(settings.call.peer_backend, PeerBackend::Simulated);
    }
}
