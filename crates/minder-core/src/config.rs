//! Minder configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MinderError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MinderConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl MinderConfig {
    /// Load config from the default path (~/.minder/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::info!("📄 No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MinderError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| MinderError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides — the bot token should not have to live in the
    /// config file.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("MINDER_BOT_TOKEN")
            && !token.trim().is_empty()
        {
            self.telegram.bot_token = token.trim().to_string();
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Minder home directory (~/.minder).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".minder")
    }
}

/// Telegram channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token. May be supplied via MINDER_BOT_TOKEN instead.
    #[serde(default)]
    pub bot_token: String,
    /// Telegram user id of the single owner. Everyone else is ignored.
    #[serde(default)]
    pub owner_user_id: i64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            owner_user_id: 0,
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.minder/minder.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Resolve the configured db path, expanding a leading `~`.
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest)
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

/// Scheduler engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the engine evaluates due jobs.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Maximum lateness after which a missed one-shot is considered lost.
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
    /// IANA zone name reminders are interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Fixed UTC offset used when the zone name cannot be resolved
    /// (e.g. no tzdata on the device).
    #[serde(default = "default_fallback_offset")]
    pub fallback_utc_offset_hours: i32,
}

fn default_tick_interval() -> u64 {
    15
}
fn default_misfire_grace() -> u64 {
    300
}
fn default_timezone() -> String {
    "America/Bogota".into()
}
fn default_fallback_offset() -> i32 {
    -5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            misfire_grace_secs: default_misfire_grace(),
            timezone: default_timezone(),
            fallback_utc_offset_hours: default_fallback_offset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MinderConfig::default();
        assert_eq!(config.scheduler.misfire_grace_secs, 300);
        assert_eq!(config.scheduler.timezone, "America/Bogota");
        assert_eq!(config.scheduler.fallback_utc_offset_hours, -5);
        assert_eq!(config.telegram.poll_timeout_secs, 30);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [telegram]
            bot_token = "123:abc"
            owner_user_id = 42

            [scheduler]
            timezone = "Europe/Berlin"
            misfire_grace_secs = 60
        "#;

        let config: MinderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.owner_user_id, 42);
        assert_eq!(config.scheduler.timezone, "Europe/Berlin");
        assert_eq!(config.scheduler.misfire_grace_secs, 60);
        // untouched sections keep defaults
        assert_eq!(config.scheduler.tick_interval_secs, 15);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: MinderConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 15);
        assert!(config.storage.db_path.ends_with("minder.db"));
    }

    #[test]
    fn test_home_dir() {
        let home = MinderConfig::home_dir();
        assert!(home.to_string_lossy().contains("minder"));
    }
}
