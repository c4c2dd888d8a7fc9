use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::error::{ProgressError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadmarkConfig {
    pub autosave: AutoSaveConfig,
    pub restore: RestoreConfig,
    pub capture: CaptureConfig,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoSaveConfig {
    /// Quiet period after the last update before a save becomes eligible.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_delay_ms")]
    pub debounce_delay: Duration,
    /// Minimum spacing between two successful writes for one document.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "min_write_interval_ms")]
    pub min_write_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "retry_backoff_ms")]
    pub retry_backoff: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(2_000),
            min_write_interval: Duration::from_millis(10_000),
            retry_backoff: Duration::from_millis(5_000),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestoreConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "notification_ms")]
    pub notification_duration: Duration,
    /// Saved positions at or below this fraction resume silently.
    pub notify_threshold: f64,
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "first_attempt_delay_ms")]
    pub first_attempt_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "attempt_delay_step_ms")]
    pub attempt_delay_step: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            notification_duration: Duration::from_millis(3_000),
            notify_threshold: 0.01,
            max_attempts: 5,
            first_attempt_delay: Duration::from_millis(500),
            attempt_delay_step: Duration::from_millis(200),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "coalesce_window_ms")]
    pub coalesce_window: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(300),
        }
    }
}

impl ReadmarkConfig {
    /// Reads a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|err| {
            ProgressError::Configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| ProgressError::Configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.restore.max_attempts == 0 {
            return Err(ProgressError::Configuration(
                "restore.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.restore.notify_threshold) {
            return Err(ProgressError::Configuration(format!(
                "restore.notify_threshold must be within [0, 1], got {}",
                self.restore.notify_threshold
            )));
        }
        Ok(())
    }
}
