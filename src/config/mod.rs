//! Engine configuration
//!
//! Timeouts for board round trips and log download settings. Stored as TOML;
//! every section has defaults so a partial file is valid.
//!
//! # Config Location
//!
//! [`EngineConfig::default_path`] resolves to the platform config directory:
//! - **Linux**: `~/.config/dev.boardlink/engine.toml`
//! - **macOS**: `~/Library/Application Support/dev.boardlink/engine.toml`
//! - **Windows**: `%APPDATA%\dev.boardlink\engine.toml`
//!
//! # Example
//!
//! ```ignore
//! use boardlink::config::EngineConfig;
//!
//! let mut config = EngineConfig::load_or_default(EngineConfig::default_path().unwrap());
//! config.timeouts.allocation_ms = 500;
//! config.save("engine.toml")?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BoardError, Result};
use crate::logger::DEFAULT_TICK_PERIOD_US;

/// Application identifier used for the config directory
pub const APP_ID: &str = "dev.boardlink";

/// Config file name
pub const CONFIG_FILE: &str = "engine.toml";

/// Default bound on waiting for a board-assigned id
pub const DEFAULT_ALLOCATION_TIMEOUT_MS: u64 = 250;

/// Default bound on waiting for a register read response
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 250;

/// Default number of progress notifications requested per readout
pub const DEFAULT_PROGRESS_UPDATES: u32 = 100;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

/// Round trip bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for an allocation reply, in milliseconds
    pub allocation_ms: u64,
    /// Wait for a register read response, in milliseconds
    pub register_read_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            allocation_ms: DEFAULT_ALLOCATION_TIMEOUT_MS,
            register_read_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl TimeoutConfig {
    pub fn allocation(&self) -> Duration {
        Duration::from_millis(self.allocation_ms)
    }

    pub fn register_read(&self) -> Duration {
        Duration::from_millis(self.register_read_ms)
    }
}

/// Log download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Duration of one board tick in microseconds
    pub tick_period_us: f64,
    /// Progress notifications requested over a whole readout
    pub progress_updates: u32,
    /// Erase downloaded entries once the readout completes
    pub clear_after_download: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            tick_period_us: DEFAULT_TICK_PERIOD_US,
            progress_updates: DEFAULT_PROGRESS_UPDATES,
            clear_after_download: false,
        }
    }
}

impl LoggingConfig {
    /// Entries between progress notifications for a readout of `count` entries
    pub fn notify_delta(&self, count: u32) -> u32 {
        if self.progress_updates == 0 {
            return 0;
        }
        (count / self.progress_updates).max(1)
    }
}

impl EngineConfig {
    /// Platform config path, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BoardError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        toml::from_str(&content).map_err(|e| {
            BoardError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load from a TOML file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BoardError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BoardError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            BoardError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timeouts.allocation(), Duration::from_millis(250));
        assert_eq!(config.logging.progress_updates, 100);
        assert!(!config.logging.clear_after_download);
        assert!((config.logging.tick_period_us - 1464.84375).abs() < 1e-9);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: EngineConfig = toml::from_str("[timeouts]\nallocation_ms = 1000\n").unwrap();
        assert_eq!(config.timeouts.allocation_ms, 1000);
        assert_eq!(config.timeouts.register_read_ms, DEFAULT_READ_TIMEOUT_MS);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = EngineConfig::default();
        config.logging.clear_after_download = true;
        config.timeouts.register_read_ms = 40;
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = EngineConfig::load_or_default("/nonexistent/boardlink/engine.toml");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_notify_delta() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.notify_delta(1000), 10);
        assert_eq!(logging.notify_delta(5), 1);
    }
}
