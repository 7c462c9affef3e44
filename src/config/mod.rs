//! Configuration management for flowcast.
//!
//! Configuration is read from `~/.config/flowcast/config.toml` (or the path
//! given with `--config`) at startup. If the file doesn't exist, a default
//! configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::hub::{DEFAULT_MAILBOX_CAPACITY, DEFAULT_QUEUE_CAPACITY};

/// Upper bound for any configured duration (100 years).
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 86400);

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub hub: HubConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `<data dir>/flowcast/flowcast.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(deserialize_with = "interval")]
    pub interval: Duration,
    /// A source is due once its last successful fetch is older than this.
    #[serde(deserialize_with = "interval")]
    pub stale_after: Duration,
    pub concurrency: usize,
    pub batch_size: usize,
    #[serde(deserialize_with = "interval")]
    pub fetch_timeout: Duration,
    #[serde(deserialize_with = "interval")]
    pub cycle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            stale_after: Duration::from_secs(15 * 60),
            concurrency: 5,
            batch_size: 100,
            fetch_timeout: Duration::from_secs(30),
            cycle_timeout: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    #[serde(deserialize_with = "interval")]
    pub interval: Duration,
    #[serde(deserialize_with = "interval")]
    pub max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 3600),
            max_age: Duration::from_secs(30 * 86400),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub mailbox_capacity: usize,
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Header carrying the account id, set by the authenticating proxy.
    pub account_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            account_header: "x-account-id".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default path when `None`.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/flowcast/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("flowcast").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("scheduler.concurrency", self.scheduler.concurrency),
            ("scheduler.batch_size", self.scheduler.batch_size),
            ("hub.mailbox_capacity", self.hub.mailbox_capacity),
            ("hub.queue_capacity", self.hub.queue_capacity),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be at least 1")));
            }
        }
        let durations = [
            ("scheduler.interval", self.scheduler.interval),
            ("scheduler.stale_after", self.scheduler.stale_after),
            ("scheduler.fetch_timeout", self.scheduler.fetch_timeout),
            ("scheduler.cycle_timeout", self.scheduler.cycle_timeout),
            ("retention.interval", self.retention.interval),
            ("retention.max_age", self.retention.max_age),
        ];
        for (field, value) in durations {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{field} must not exceed {}",
                    format_interval(MAX_DURATION)
                )));
            }
        }
        let positive = [
            ("scheduler.interval", self.scheduler.interval),
            ("scheduler.fetch_timeout", self.scheduler.fetch_timeout),
            ("scheduler.cycle_timeout", self.scheduler.cycle_timeout),
            ("retention.interval", self.retention.interval),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{field} must be positive")));
            }
        }
        Ok(())
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# flowcast configuration
#
# Durations are written as "30s", "15m", "6h" or "30d".

[database]
# SQLite file; defaults to the platform data directory
# path = "/var/lib/flowcast/flowcast.db"

[scheduler]
# How often to look for due sources
interval = "15m"

# A source is due when its last successful fetch is older than this
stale_after = "15m"

# Sources fetched in parallel
concurrency = 5

# Sources picked per cycle
batch_size = 100

# Deadline for a single fetch
fetch_timeout = "30s"

# Deadline for a whole cycle
cycle_timeout = "5m"

[retention]
interval = "24h"

# Items stored longer than this are deleted
max_age = "30d"

[hub]
# Frames buffered per connection before it is dropped as too slow
mailbox_capacity = 256
queue_capacity = 1024

[server]
bind = "127.0.0.1:8080"

# Header the authenticating proxy uses to pass the account id
account_header = "x-account-id"
"##
        .to_string()
    }
}

/// Parse interval string like "1h", "30m", "6h", "1d"
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let scaled = |value: &str, unit: u64, name: &str| -> Result<u64, String> {
        value
            .parse::<u64>()
            .map_err(|_| format!("Invalid {}: {}", name, value))?
            .checked_mul(unit)
            .ok_or_else(|| format!("Interval too large: {}", s))
    };

    let secs = if let Some(hours) = s.strip_suffix('h') {
        scaled(hours, 3600, "hours")
    } else if let Some(minutes) = s.strip_suffix('m') {
        scaled(minutes, 60, "minutes")
    } else if let Some(days) = s.strip_suffix('d') {
        scaled(days, 86400, "days")
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>()
            .map_err(|_| format!("Invalid seconds: {}", secs))
    } else {
        s.parse::<u64>()
            .map_err(|_| format!("Invalid interval: {}. Use format like '30s', '15m', '1d'", s))
    }?;

    Ok(Duration::from_secs(secs))
}

/// Format interval for display
pub fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs == 0 {
        format!("{}ms", interval.as_millis())
    } else if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

fn interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => parse_interval(&s).map_err(serde::de::Error::custom),
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
