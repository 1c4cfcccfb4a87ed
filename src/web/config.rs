use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub log: LogConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub listener: Option<ListenerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        WebConfig {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Retention of each aborted check in Redis.
    #[serde(default = "default_ttl", deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
    #[serde(
        default = "default_refresh_period",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_period: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            ttl: default_ttl(),
            refresh_period: default_refresh_period(),
        }
    }
}

fn default_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_refresh_period() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(
        default = "default_ping_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub ping_interval: Duration,
    /// Per-subscriber queue capacity.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    /// Dropped messages after which a subscriber is disconnected.
    #[serde(default = "default_max_dropped")]
    pub max_dropped: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            ping_interval: default_ping_interval(),
            buffer: default_buffer(),
            max_dropped: default_max_dropped(),
        }
    }
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_buffer() -> usize {
    64
}

fn default_max_dropped() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub url: String,
    pub channel: String,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("store.ttl", self.store.ttl),
            ("store.refresh_period", self.store.refresh_period),
            ("stream.ping_interval", self.stream.ping_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.stream.buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.buffer",
                reason: "must be greater than zero".into(),
            });
        }
        if self.stream.max_dropped == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.max_dropped",
                reason: "must be greater than zero".into(),
            });
        }

        self.log
            .level
            .parse::<log::LevelFilter>()
            .map_err(|e| ConfigError::Invalid {
                field: "log.level",
                reason: e.to_string(),
            })?;

        if let Some(listener) = &self.listener {
            if listener.channel.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "listener.channel",
                    reason: "must not be empty".into(),
                });
            }
        }

        Ok(())
    }
}
