//! Coordinator and engine configuration
//!
//! Every delay the engines honour lives in [`EngineTiming`]. Configuration
//! files are JSON with durations in milliseconds; missing fields fall back
//! to the defaults.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TagError;

/// Durations travel as whole milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms: u64 = Deserialize::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Delays and detection windows used by the engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTiming {
    /// Mifare: poll interval while waiting for a card
    #[serde(with = "millis")]
    pub mifare_detect_interval: Duration,
    /// Mifare: window for re-selecting after card typing
    #[serde(with = "millis")]
    pub mifare_reselect_timeout: Duration,
    /// Mifare: window for re-activating after a failed authentication
    #[serde(with = "millis")]
    pub mifare_reactivate_timeout: Duration,
    /// Mifare: pause after each block write
    #[serde(with = "millis")]
    pub mifare_block_write_delay: Duration,
    /// Mifare: detection window of a single block write
    #[serde(with = "millis")]
    pub mifare_single_block_timeout: Duration,

    /// SRIX: poll interval while waiting for a tag
    #[serde(with = "millis")]
    pub srix_detect_interval: Duration,
    /// SRIX: pause before retrying a failed read pass
    #[serde(with = "millis")]
    pub srix_retry_delay: Duration,
    /// SRIX: window for re-detecting the tag between block writes
    #[serde(with = "millis")]
    pub srix_redetect_timeout: Duration,
    /// SRIX: detection window of a single block write
    #[serde(with = "millis")]
    pub srix_single_block_timeout: Duration,
    /// SRIX: EEPROM commit time after a block write
    #[serde(with = "millis")]
    pub srix_eeprom_delay: Duration,
    /// SRIX: pause between re-select and read back verification
    #[serde(with = "millis")]
    pub srix_verify_delay: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            mifare_detect_interval: Duration::from_millis(50),
            mifare_reselect_timeout: Duration::from_millis(500),
            mifare_reactivate_timeout: Duration::from_millis(50),
            mifare_block_write_delay: Duration::from_millis(10),
            mifare_single_block_timeout: Duration::from_millis(5000),
            srix_detect_interval: Duration::from_millis(50),
            srix_retry_delay: Duration::from_millis(100),
            srix_redetect_timeout: Duration::from_millis(600),
            srix_single_block_timeout: Duration::from_millis(2500),
            srix_eeprom_delay: Duration::from_millis(15),
            srix_verify_delay: Duration::from_millis(10),
        }
    }
}

impl EngineTiming {
    /// Timing with every pause zeroed and short detection windows
    pub fn instant() -> Self {
        Self {
            mifare_detect_interval: Duration::ZERO,
            mifare_reselect_timeout: Duration::from_millis(20),
            mifare_reactivate_timeout: Duration::from_millis(20),
            mifare_block_write_delay: Duration::ZERO,
            mifare_single_block_timeout: Duration::from_millis(50),
            srix_detect_interval: Duration::ZERO,
            srix_retry_delay: Duration::ZERO,
            srix_redetect_timeout: Duration::from_millis(20),
            srix_single_block_timeout: Duration::from_millis(50),
            srix_eeprom_delay: Duration::ZERO,
            srix_verify_delay: Duration::ZERO,
        }
    }
}

/// Settings of a [`TagCoordinator`](crate::coordinator::TagCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Root directory for dumps and keys (default: see `FsStorage::default_root`)
    pub storage_dir: Option<PathBuf>,
    /// Key database path inside the storage
    pub key_file: String,
    pub srix_dir: String,
    pub mifare_dir: String,
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    #[serde(with = "millis")]
    pub write_timeout: Duration,
    #[serde(with = "millis")]
    pub uid_timeout: Duration,
    pub timing: EngineTiming,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            key_file: "mifare_keys.txt".to_string(),
            srix_dir: "DUMPS/SRIX".to_string(),
            mifare_dir: "DUMPS/MIFARE".to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(20),
            uid_timeout: Duration::from_secs(5),
            timing: EngineTiming::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load a configuration file
    pub fn load_from(path: &Path) -> Result<Self, TagError> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)
            .map_err(|e| TagError::FileError(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(path).unwrap_or_else(|e| {
            warn!("Failed to load configuration: {}", e);
            Self::default()
        })
    }

    /// Write the configuration as pretty JSON
    pub fn save_to(&self, path: &Path) -> Result<(), TagError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TagError::FileError(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}
