// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Simulated printer for running the daemon without hardware.
//
// Behaves like a small FlashForge machine: a print advances a few percent per
// `update()`, heaters creep toward their targets, and job commands move the
// status between READY / BUILDING_FROM_SD / PAUSED. Transport failures can be
// injected deterministically with `fail_every`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use forgelink_core::config::FILE_PREFIX;
use forgelink_core::error::{ForgeError, Result};
use forgelink_core::types::{DeviceIdentity, MachineStatus, Telemetry, ToolTemperature};
use forgelink_printer::PrinterClient;

/// Percent a running job advances per update.
const PROGRESS_STEP: u8 = 5;
/// Layers of every simulated job.
const JOB_LAYERS: u32 = 120;
const AMBIENT: f64 = 22.0;

#[derive(Debug)]
struct SimState {
    status: MachineStatus,
    files: Vec<String>,
    telemetry: Telemetry,
}

pub struct SimulatedPrinter {
    host: String,
    state: Mutex<SimState>,
    identity: DeviceIdentity,
    connected: AtomicBool,
    updates: AtomicU64,
    fail_every: Option<u64>,
}

impl SimulatedPrinter {
    pub fn new(host: impl Into<String>) -> Self {
        let tool = |name: &str| ToolTemperature {
            name: name.into(),
            current: AMBIENT,
            target: 0.0,
        };
        Self {
            host: host.into(),
            state: Mutex::new(SimState {
                status: MachineStatus::Ready,
                files: ["benchy.gx", "calibration_cube.gx", "vase.gx"]
                    .iter()
                    .map(|f| format!("{FILE_PREFIX}{f}"))
                    .collect(),
                telemetry: Telemetry {
                    print_percent: Some(0),
                    print_status: Some("READY".into()),
                    move_mode: Some("READY".into()),
                    led: Some(true),
                    extruders: vec![tool("T0")],
                    beds: vec![tool("B")],
                    ..Default::default()
                },
            }),
            identity: DeviceIdentity {
                machine_type: Some("FlashForge Adventurer 4 (simulated)".into()),
                machine_name: Some("Adventurer4".into()),
                firmware: Some("v2.2.1-sim".into()),
                serial: Some("SNSIM0000001".into()),
                mac_address: Some("02:00:00:00:00:01".into()),
            },
            connected: AtomicBool::new(false),
            updates: AtomicU64::new(0),
            fail_every: None,
        }
    }

    /// Make every `n`th `update()` time out. `0` disables injection.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    fn require_connection(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ForgeError::Connection(format!("{}: not connected", self.host)))
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = self.state.lock().expect("simulator lock poisoned");
        f(&mut state)
    }
}

fn approach(tool: &mut ToolTemperature) {
    let goal = if tool.target > 0.0 { tool.target } else { AMBIENT };
    let delta = (goal - tool.current) / 2.0;
    tool.current = if delta.abs() < 0.5 { goal } else { tool.current + delta };
}

impl SimState {
    fn advance(&mut self) {
        let t = &mut self.telemetry;
        t.extruders.iter_mut().chain(t.beds.iter_mut()).for_each(approach);

        match self.status {
            MachineStatus::BuildingFromSd => {
                let percent = t.print_percent.unwrap_or(0).saturating_add(PROGRESS_STEP).min(100);
                t.print_percent = Some(percent);
                t.print_layer = Some(JOB_LAYERS * u32::from(percent) / 100);
                if percent == 100 {
                    self.status = MachineStatus::BuildingCompleted;
                    self.set_heaters(0.0, 0.0);
                }
            }
            MachineStatus::BuildingCompleted => {
                self.status = MachineStatus::Ready;
                self.telemetry.job_file = None;
            }
            _ => {}
        }
        self.telemetry.print_status = Some(self.status.to_string());
    }

    fn set_heaters(&mut self, extruder: f64, bed: f64) {
        self.telemetry.extruders.iter_mut().for_each(|t| t.target = extruder);
        self.telemetry.beds.iter_mut().for_each(|t| t.target = bed);
    }
}

fn reply(code: &str) -> String {
    format!("CMD {code} Received.\r\nok")
}

#[async_trait]
impl PrinterClient for SimulatedPrinter {
    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!(host = %self.host, "simulated printer connected");
        Ok(())
    }

    async fn update(&self) -> Result<()> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|every| n % every == 0) {
            return Err(ForgeError::Timeout(format!("{}: simulated timeout on update {n}", self.host)));
        }
        self.require_connection()?;
        self.with_state(SimState::advance);
        Ok(())
    }

    async fn file_names(&self) -> Result<Vec<String>> {
        self.require_connection()?;
        Ok(self.with_state(|s| s.files.clone()))
    }

    fn machine_status(&self) -> Option<MachineStatus> {
        Some(self.with_state(|s| s.status.clone()))
    }

    fn telemetry(&self) -> Telemetry {
        self.with_state(|s| s.telemetry.clone())
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    async fn send_pause(&self) -> Result<String> {
        self.require_connection()?;
        self.with_state(|s| {
            if s.status == MachineStatus::BuildingFromSd {
                s.status = MachineStatus::Paused;
            }
        });
        Ok(reply("M25"))
    }

    async fn send_continue(&self) -> Result<String> {
        self.require_connection()?;
        self.with_state(|s| {
            if s.status == MachineStatus::Paused {
                s.status = MachineStatus::BuildingFromSd;
            }
        });
        Ok(reply("M24"))
    }

    async fn send_abort(&self) -> Result<String> {
        self.require_connection()?;
        self.with_state(|s| {
            s.status = MachineStatus::Ready;
            s.telemetry.job_file = None;
            s.telemetry.print_percent = Some(0);
            s.telemetry.print_layer = None;
            s.set_heaters(0.0, 0.0);
        });
        Ok(reply("M26"))
    }

    async fn send_print(&self, file: &str) -> Result<String> {
        self.require_connection()?;
        self.with_state(|s| {
            let stored = format!("{FILE_PREFIX}{file}");
            if !s.files.contains(&stored) {
                return Err(ForgeError::Protocol(format!("file not found: {file}")));
            }
            s.status = MachineStatus::BuildingFromSd;
            s.telemetry.job_file = Some(file.to_string());
            s.telemetry.job_layers = Some(JOB_LAYERS);
            s.telemetry.print_layer = Some(0);
            s.telemetry.print_percent = Some(0);
            s.set_heaters(210.0, 60.0);
            Ok(())
        })?;
        Ok(reply("M23"))
    }

    async fn set_led(&self, on: bool) -> Result<()> {
        self.require_connection()?;
        self.with_state(|s| s.telemetry.led = Some(on));
        Ok(())
    }

    async fn camera_stream_url(&self) -> Result<String> {
        Ok(format!("http://{}:8080/?action=stream", self.host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_requires_connection() {
        let printer = SimulatedPrinter::new("127.0.0.1");
        assert!(matches!(printer.update().await, Err(ForgeError::Connection(_))));
        printer.connect().await.unwrap();
        printer.update().await.unwrap();
    }

    #[tokio::test]
    async fn injected_timeouts_are_periodic() {
        let printer = SimulatedPrinter::new("127.0.0.1").with_fail_every(3);
        printer.connect().await.unwrap();

        let outcomes: Vec<bool> = {
            let mut v = Vec::new();
            for _ in 0..6 {
                v.push(printer.update().await.is_ok());
            }
            v
        };
        assert_eq!(outcomes, [true, true, false, true, true, false]);
    }

    #[tokio::test]
    async fn print_runs_to_completion() {
        let printer = SimulatedPrinter::new("127.0.0.1");
        printer.connect().await.unwrap();
        assert!(printer.send_print("missing.gx").await.is_err());

        printer.send_print("benchy.gx").await.unwrap();
        assert_eq!(printer.machine_status(), Some(MachineStatus::BuildingFromSd));

        printer.send_pause().await.unwrap();
        printer.update().await.unwrap();
        assert_eq!(printer.telemetry().print_percent, Some(0));
        printer.send_continue().await.unwrap();

        for _ in 0..(100 / PROGRESS_STEP) {
            printer.update().await.unwrap();
        }
        assert_eq!(printer.machine_status(), Some(MachineStatus::BuildingCompleted));
        assert_eq!(printer.telemetry().print_layer, Some(JOB_LAYERS));

        printer.update().await.unwrap();
        assert_eq!(printer.machine_status(), Some(MachineStatus::Ready));
        assert_eq!(printer.telemetry().job_file, None);
    }

    #[tokio::test]
    async fn heaters_settle_on_target() {
        let printer = SimulatedPrinter::new("127.0.0.1");
        printer.connect().await.unwrap();
        printer.send_print("vase.gx").await.unwrap();
        printer.send_pause().await.unwrap();

        for _ in 0..20 {
            printer.update().await.unwrap();
        }
        let telemetry = printer.telemetry();
        assert_eq!(telemetry.extruders[0].current, 210.0);
        assert_eq!(telemetry.beds[0].current, 60.0);
    }
}
