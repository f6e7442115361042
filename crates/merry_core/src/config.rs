//! Session Configuration
//!
//! Handles the knobs of a coprocessor session and saving/loading them.
//!
//! # Storage Locations
//! - Linux: `~/.config/merry/session.json`
//! - Windows: `%APPDATA%\merry\session.json`
//! - macOS: `~/Library/Application Support/merry/session.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use merry_platform::layout::{ADDRESS_TABLE_LEN, FRAME_ID_SEED, REGION_COUNT};
use merry_platform::SEMAPHORE_FRAME_MASK;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{SyncError, SyncResult};

/// Firmware file name looked up in the data directory
pub const FIRMWARE_FILE_NAME: &str = "dspfirm.cdc";

/// Coprocessor session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where to read the firmware image from
    pub firmware_path: PathBuf,

    /// Deadline for each frame wait in milliseconds (None = block forever)
    pub frame_timeout_ms: Option<u64>,

    /// Deadline for the address-table handshake in milliseconds (None = block forever)
    pub boot_timeout_ms: Option<u64>,

    /// Address-table length the firmware must report
    pub expected_address_count: u16,

    /// Wake reasons the notify semaphore is restricted to
    pub semaphore_mask: u16,

    /// Program memory mask passed with the component upload
    pub program_mask: u16,

    /// Data memory mask passed with the component upload
    pub data_mask: u16,

    /// Frame id handed to the coprocessor during the handshake
    pub frame_id_seed: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            firmware_path: default_firmware_path(),
            frame_timeout_ms: None,
            boot_timeout_ms: None,
            expected_address_count: ADDRESS_TABLE_LEN,
            semaphore_mask: SEMAPHORE_FRAME_MASK,
            program_mask: 0xFF,
            data_mask: 0xFF,
            frame_id_seed: FRAME_ID_SEED,
        }
    }
}

impl SessionConfig {
    /// Configuration with deadlines, so a silent coprocessor becomes a fault
    pub fn with_watchdog() -> Self {
        Self {
            frame_timeout_ms: Some(100),
            boot_timeout_ms: Some(2000),
            ..Self::default()
        }
    }

    /// Use a specific firmware file
    pub fn with_firmware_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.firmware_path = path.into();
        self
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }

    pub fn boot_timeout(&self) -> Option<Duration> {
        self.boot_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration
    pub fn validate(&self) -> SyncResult<()> {
        if (self.expected_address_count as usize) < REGION_COUNT {
            return Err(SyncError::InvalidConfig(format!(
                "Address table must hold at least {} entries, got {}",
                REGION_COUNT, self.expected_address_count
            )));
        }
        if self.frame_timeout_ms == Some(0) {
            return Err(SyncError::InvalidConfig(
                "Frame timeout must be positive".to_string(),
            ));
        }
        if self.boot_timeout_ms == Some(0) {
            return Err(SyncError::InvalidConfig(
                "Boot timeout must be positive".to_string(),
            ));
        }
        if self.semaphore_mask == 0 {
            return Err(SyncError::InvalidConfig(
                "Semaphore mask must select at least one wake reason".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from(path: &Path) -> SyncResult<Self> {
        let file = fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        info!("Session config loaded from {:?}", path);
        Ok(config)
    }

    /// Load configuration from the default location, or return default if missing/corrupt
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => error!("Failed to load session config: {}", e),
                }
            }
        }

        info!("Using default session config");
        Self::default()
    }

    /// Save configuration as pretty JSON
    pub fn save_to(&self, path: &Path) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Session config saved to {:?}", path);
        Ok(())
    }

    /// Save configuration to the default location
    pub fn save(&self) -> SyncResult<()> {
        let path = Self::config_path().ok_or_else(|| {
            SyncError::InvalidConfig("Could not determine config path".to_string())
        })?;
        self.save_to(&path)
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "merry").map(|dirs| dirs.config_dir().join("session.json"))
    }
}

/// Firmware location in the per-user data directory
pub fn default_firmware_path() -> PathBuf {
    ProjectDirs::from("", "", "merry")
        .map(|dirs| dirs.data_dir().join(FIRMWARE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(FIRMWARE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.expected_address_count, 15);
        assert_eq!(config.semaphore_mask, 0x2000);
        assert_eq!(config.frame_id_seed, 2);
        assert!(config.frame_timeout().is_none());
        assert!(config.firmware_path.ends_with(FIRMWARE_FILE_NAME));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_watchdog_preset() {
        let config = SessionConfig::with_watchdog();
        assert_eq!(config.frame_timeout(), Some(Duration::from_millis(100)));
        assert!(config.boot_timeout().is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let short_table = SessionConfig {
            expected_address_count: 4,
            ..Default::default()
        };
        assert!(short_table.validate().is_err());

        let zero_timeout = SessionConfig {
            frame_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let no_mask = SessionConfig {
            semaphore_mask: 0,
            ..Default::default()
        };
        assert!(matches!(no_mask.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let config = SessionConfig::with_watchdog().with_firmware_path("/sd/3ds/dspfirm.cdc");
        config.save_to(&path).unwrap();

        let loaded = SessionConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SessionConfig::load_from(&path),
            Err(SyncError::ConfigParse(_))
        ));
    }
}
