// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The printer client seam.
//
// The wire protocol lives outside this workspace. Everything the coordinator,
// the command services and the entity layer need from a printer goes through
// `PrinterClient`, so any protocol implementation (or a test double) can be
// plugged in.

use async_trait::async_trait;

use forgelink_core::error::Result;
use forgelink_core::types::{DeviceIdentity, MachineStatus, Telemetry};

/// Async handle to one printer.
///
/// Transport failures must be reported as `ForgeError::Connection` or
/// `ForgeError::Timeout`; those are the only errors the refresh policy
/// retries. Property reads are synchronous and reflect the last successful
/// `update()` / `connect()`.
#[async_trait]
pub trait PrinterClient: Send + Sync + 'static {
    /// Forget any established session so the next `connect()` starts clean.
    fn mark_disconnected(&self);

    /// Open (or re-open) the control session and read identity fields.
    async fn connect(&self) -> Result<()>;

    /// Refresh the cached telemetry (status, temperatures, progress).
    async fn update(&self) -> Result<()>;

    /// List print files stored on the device. Entries may carry the storage
    /// prefix.
    async fn file_names(&self) -> Result<Vec<String>>;

    fn machine_status(&self) -> Option<MachineStatus>;

    fn telemetry(&self) -> Telemetry;

    fn identity(&self) -> DeviceIdentity;

    // -- Commands (never retried) ---------------------------------------------

    async fn send_pause(&self) -> Result<String>;

    async fn send_continue(&self) -> Result<String>;

    async fn send_abort(&self) -> Result<String>;

    /// Start printing a stored file (name without storage prefix).
    async fn send_print(&self, file: &str) -> Result<String>;

    async fn set_led(&self, on: bool) -> Result<()>;

    /// URL of the printer's MJPEG camera stream.
    async fn camera_stream_url(&self) -> Result<String>;
}
