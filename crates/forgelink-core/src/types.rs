// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Forgelink printer integration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FILE_PREFIX;

/// Machine activity state as reported by the printer.
///
/// Known keywords get their own variant; anything else is kept verbatim so a
/// firmware update never turns into a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MachineStatus {
    Ready,
    BuildingFromSd,
    BuildingCompleted,
    Paused,
    Busy,
    Other(String),
}

impl MachineStatus {
    /// Wire keyword for this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ready => "READY",
            Self::BuildingFromSd => "BUILDING_FROM_SD",
            Self::BuildingCompleted => "BUILDING_COMPLETED",
            Self::Paused => "PAUSED",
            Self::Busy => "BUSY",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "READY" => Self::Ready,
            "BUILDING_FROM_SD" => Self::BuildingFromSd,
            "BUILDING_COMPLETED" => Self::BuildingCompleted,
            "PAUSED" => Self::Paused,
            "BUSY" => Self::Busy,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for MachineStatus {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<MachineStatus> for String {
    fn from(status: MachineStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Current and target temperature of one heated tool (extruder or bed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTemperature {
    /// Tool name as the printer reports it (e.g. "T0", "B").
    pub name: String,
    pub current: f64,
    pub target: f64,
}

/// Live telemetry captured alongside the status on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Job progress in percent.
    pub print_percent: Option<u8>,
    /// File currently being printed.
    pub job_file: Option<String>,
    pub job_layers: Option<u32>,
    pub print_layer: Option<u32>,
    /// Secondary status line (endstop/job state, e.g. "MOVING").
    pub print_status: Option<String>,
    pub move_mode: Option<String>,
    pub led: Option<bool>,
    pub extruders: Vec<ToolTemperature>,
    pub beds: Vec<ToolTemperature>,
}

/// Immutable, fully populated view of device state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: Option<MachineStatus>,
    /// Print jobs stored on the device, storage prefix stripped.
    pub files: Vec<String>,
    pub telemetry: Telemetry,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from raw client output, stripping the storage prefix
    /// from every filename.
    pub fn new(
        status: Option<MachineStatus>,
        raw_files: Vec<String>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            status,
            files: strip_storage_prefix(raw_files),
            telemetry,
            fetched_at: Utc::now(),
        }
    }
}

/// Remove the device storage prefix from each filename, preserving order.
pub fn strip_storage_prefix(files: Vec<String>) -> Vec<String> {
    files
        .into_iter()
        .map(|f| match f.strip_prefix(FILE_PREFIX) {
            Some(rest) => rest.to_string(),
            None => f,
        })
        .collect()
}

/// Identity fields read from the printer on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub machine_type: Option<String>,
    pub machine_name: Option<String>,
    pub firmware: Option<String>,
    pub serial: Option<String>,
    pub mac_address: Option<String>,
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Connection failure or timeout; safe to retry immediately.
    Transient,
    /// The printer must change state first (e.g. finish the current job).
    UserAction,
    /// Anything else; never retried.
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_keywords_round_trip() {
        let status: MachineStatus = "BUILDING_FROM_SD".parse().unwrap();
        assert_eq!(status, MachineStatus::BuildingFromSd);
        assert_eq!(status.to_string(), "BUILDING_FROM_SD");
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let status: MachineStatus = "HEATING".parse().unwrap();
        assert_eq!(status, MachineStatus::Other("HEATING".into()));
        assert_eq!(status.as_str(), "HEATING");
        assert!(!status.is_ready());
    }

    #[test]
    fn status_serializes_as_keyword() {
        let json = serde_json::to_string(&MachineStatus::Ready).unwrap();
        assert_eq!(json, "\"READY\"");
        let back: MachineStatus = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(back, MachineStatus::Paused);
    }

    #[test]
    fn prefix_is_stripped_in_order() {
        let files = strip_storage_prefix(vec![
            "/data/b.gx".into(),
            "/data/a.gx".into(),
            "c.gx".into(),
        ]);
        assert_eq!(files, vec!["b.gx", "a.gx", "c.gx"]);
    }

    #[test]
    fn prefix_only_stripped_once_at_start() {
        let files = strip_storage_prefix(vec!["/data//data/x.gx".into(), "/usr/data/y.gx".into()]);
        assert_eq!(files, vec!["/data/x.gx", "/usr/data/y.gx"]);
    }
}
