// src/config.rs

//! Defines the configuration structures for the composition session.
//!
//! The tree is deserialized from a JSON file named by the
//! `COMPOSER_SESSION_CONFIG` environment variable. Every struct carries
//! `#[serde(default)]`, so a partial file only overrides what it names.

use anyhow::{Context, Result};
use log::*;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "COMPOSER_SESSION_CONFIG";

/// Process-wide configuration, loaded on first access.
///
/// A file that cannot be read or parsed falls back to the defaults.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match Config::from_env() {
    Ok(config) => config,
    Err(e) => {
        warn!("Config: falling back to defaults: {:#}", e);
        Config::default()
    }
});

// --- Top-Level Configuration Structure ---

/// Root of the configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Slot coordination and client notification settings.
    pub session: SessionConfig,
    /// Power-hint worker settings.
    pub power_hint: PowerHintConfig,
}

impl Config {
    /// Reads a configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Loads the file named by [`CONFIG_ENV_VAR`], or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}

// --- Session Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Back-off between retries of a client notification the sink refused.
    pub notify_retry_interval_ms: u64,
    /// Settle delay after a delayed hotplug, in primary vsync periods.
    pub hotplug_settle_vsyncs: u32,
    /// Vsync period reported when a display cannot answer (60 Hz).
    pub default_vsync_period_ns: u64,
    /// Upper bound on the concatenated display dump.
    pub max_dump_bytes: usize,
    /// Forces a client validate before every present.
    pub disable_skip_validate: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            notify_retry_interval_ms: 10,
            hotplug_settle_vsyncs: 2,
            default_vsync_period_ns: 16_666_666,
            max_dump_bytes: 8192,
            disable_skip_validate: false,
        }
    }
}

/// Longest settle delay a hotplug may take, whatever the vsync count.
const MAX_SETTLE_DELAY: Duration = Duration::from_secs(1);

impl SessionConfig {
    pub fn notify_retry_interval(&self) -> Duration {
        Duration::from_millis(self.notify_retry_interval_ms)
    }

    /// `hotplug_settle_vsyncs` periods of `vsync_period_ns`, capped at one second.
    pub fn settle_delay(&self, vsync_period_ns: u64) -> Duration {
        let nanos = vsync_period_ns.saturating_mul(u64::from(self.hotplug_settle_vsyncs));
        Duration::from_nanos(nanos).min(MAX_SETTLE_DELAY)
    }
}

// --- Power Hint Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerHintConfig {
    /// How long after a present the display is considered idle.
    pub idle_timeout_ms: u64,
    /// Delay before retrying a refresh-rate hint that failed for a
    /// reason other than a transport disconnect.
    pub retry_backoff_ms: u64,
    /// Vsync period assumed until the first signal arrives.
    pub initial_vsync_period_ns: u64,
}

impl Default for PowerHintConfig {
    fn default() -> Self {
        PowerHintConfig {
            idle_timeout_ms: 100,
            retry_backoff_ms: 100,
            initial_vsync_period_ns: 16_666_666,
        }
    }
}

impl PowerHintConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
