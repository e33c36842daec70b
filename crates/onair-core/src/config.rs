use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform;
use crate::schedule::Rotation;

/// Fallback slot length for episodes with unknown duration.
pub const DEFAULT_FALLBACK_SLOT_SECS: f64 = 30.0 * 60.0;
/// One cycle of the looping program.
pub const DEFAULT_CYCLE_DAYS: u32 = 7;
/// Bounded wait for media metadata before seeking best-effort.
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;
/// Never seek closer to a known end than this, so "ended" still fires.
pub const DEFAULT_END_SEEK_GUARD_SECS: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where the episode catalog comes from.  A local file, when set, takes
/// priority over the URL (offline use, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Which rotation strategy picks the starting catalog offset for the
/// current cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RotationConfig {
    #[serde(default)]
    pub mode: Rotation,
}

/// The scheduling and session constants.  Observed behavior never tunes
/// these at runtime, but they are named configuration rather than magic
/// numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_cycle_days")]
    pub cycle_days: u32,
    #[serde(default = "default_fallback_slot_secs")]
    pub fallback_slot_secs: f64,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_end_seek_guard_secs")]
    pub end_seek_guard_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for the player log file.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            file: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycle_days: default_cycle_days(),
            fallback_slot_secs: default_fallback_slot_secs(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            end_seek_guard_secs: default_end_seek_guard_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

fn default_feed_url() -> String {
    "http://127.0.0.1:8000/schedule.json".to_string()
}

fn default_cycle_days() -> u32 {
    DEFAULT_CYCLE_DAYS
}

fn default_fallback_slot_secs() -> f64 {
    DEFAULT_FALLBACK_SLOT_SECS
}

fn default_metadata_timeout_secs() -> u64 {
    DEFAULT_METADATA_TIMEOUT_SECS
}

fn default_end_seek_guard_secs() -> f64 {
    DEFAULT_END_SEEK_GUARD_SECS
}

fn default_log_dir() -> PathBuf {
    platform::data_dir()
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
