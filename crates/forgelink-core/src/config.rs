// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device and coordinator configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForgeError, Result};

/// Seconds between scheduled refreshes.
pub const SCAN_INTERVAL: u64 = 10;

/// Consecutive transient failures absorbed before the coordinator reports
/// the device unavailable.
pub const MAX_FAILED_UPDATES: u32 = 3;

/// Default TCP port of the printer's control protocol.
pub const DEFAULT_PORT: u16 = 8899;

/// Storage prefix the printer puts in front of every stored filename.
pub const FILE_PREFIX: &str = "/data/";

/// Default display name for a device without a configured name.
pub const DEFAULT_NAME: &str = "FlashForge";

/// Settings for one configured printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Stable id of this configuration entry.
    pub entry_id: Uuid,
    /// Printer IP address or hostname.
    pub ip_address: String,
    /// Control port (default 8899).
    pub port: u16,
    /// Display name used as the entity title.
    pub name: String,
    /// Unique id for entity ids; normally the printer serial number.
    pub unique_id: Option<String>,
    /// Seconds between scheduled refreshes.
    pub scan_interval_secs: u64,
    /// Consecutive transient failures tolerated per refresh cycle.
    pub max_failed_updates: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            ip_address: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            name: DEFAULT_NAME.into(),
            unique_id: None,
            scan_interval_secs: SCAN_INTERVAL,
            max_failed_updates: MAX_FAILED_UPDATES,
        }
    }
}

impl DeviceConfig {
    /// Read a JSON configuration file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ip_address.trim().is_empty() {
            return Err(ForgeError::Config("ip_address cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ForgeError::Config("port cannot be 0".into()));
        }
        if self.scan_interval_secs == 0 {
            return Err(ForgeError::Config("scan_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// `host:port` address of the printer.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    /// Name given to the coordinator for log output.
    pub fn coordinator_name(&self) -> String {
        format!("{DEFAULT_NAME}-{}", self.entry_id)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            update_interval: Duration::from_secs(self.scan_interval_secs),
            max_failed_updates: self.max_failed_updates,
        }
    }
}

/// Polling parameters for one update coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Fixed delay between scheduled refreshes.
    pub update_interval: Duration,
    /// Consecutive transient failures absorbed before reporting unavailable.
    pub max_failed_updates: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(SCAN_INTERVAL),
            max_failed_updates: MAX_FAILED_UPDATES,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ip_address": "192.168.0.64", "name": "Adventurer4"}}"#).unwrap();

        let config = DeviceConfig::load(file.path()).unwrap();
        assert_eq!(config.ip_address, "192.168.0.64");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.name, "Adventurer4");
        assert_eq!(config.address(), "192.168.0.64:8899");
        assert_eq!(config.coordinator_config(), CoordinatorConfig::default());
    }

    #[test]
    fn load_rejects_empty_address() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ip_address": "  "}}"#).unwrap();

        let err = DeviceConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeviceConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ForgeError::Io(_)));
    }

    #[test]
    fn coordinator_config_uses_configured_interval() {
        let config = DeviceConfig {
            scan_interval_secs: 30,
            max_failed_updates: 5,
            ..Default::default()
        };
        let coord = config.coordinator_config();
        assert_eq!(coord.update_interval, Duration::from_secs(30));
        assert_eq!(coord.max_failed_updates, 5);
        assert!(config.coordinator_name().starts_with("FlashForge-"));
    }
}
