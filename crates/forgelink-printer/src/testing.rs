// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted printer client for tests.
//
// Each call to `update()` / `connect()` pops the next scripted outcome (an
// empty script means success). Call counters and a command log let tests
// assert exactly what the coordinator did, and `hold_updates` parks
// `update()` until the test releases it so a cycle can be kept in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};

use forgelink_core::error::{ForgeError, Result};
use forgelink_core::types::{DeviceIdentity, MachineStatus, Telemetry, ToolTemperature};

/// Outcome of one scripted client call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ok,
    Timeout,
    ConnectionLost,
    ProtocolError,
}

impl Step {
    fn into_result(self) -> Result<()> {
        match self {
            Step::Ok => Ok(()),
            Step::Timeout => Err(ForgeError::Timeout("scripted timeout".into())),
            Step::ConnectionLost => Err(ForgeError::Connection("scripted connection reset".into())),
            Step::ProtocolError => Err(ForgeError::Protocol("scripted garbage reply".into())),
        }
    }
}

/// In-memory `PrinterClient` driven by a script.
pub struct ScriptedPrinter {
    update_script: Mutex<VecDeque<Step>>,
    connect_script: Mutex<VecDeque<Step>>,
    status: Mutex<Option<MachineStatus>>,
    files: Mutex<Vec<String>>,
    telemetry: Mutex<Telemetry>,
    identity: DeviceIdentity,
    commands: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    updates: watch::Sender<usize>,
    connect_calls: AtomicUsize,
    file_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl Default for ScriptedPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPrinter {
    /// A READY Adventurer 4 with two stored files.
    pub fn new() -> Self {
        Self {
            update_script: Mutex::new(VecDeque::new()),
            connect_script: Mutex::new(VecDeque::new()),
            status: Mutex::new(Some(MachineStatus::Ready)),
            files: Mutex::new(vec!["/data/a.gx".into(), "/data/b.gx".into()]),
            telemetry: Mutex::new(Telemetry {
                print_percent: Some(0),
                led: Some(true),
                extruders: vec![ToolTemperature {
                    name: "T0".into(),
                    current: 198.0,
                    target: 210.0,
                }],
                beds: vec![ToolTemperature {
                    name: "B".into(),
                    current: 48.0,
                    target: 64.0,
                }],
                ..Default::default()
            }),
            identity: DeviceIdentity {
                machine_type: Some("FlashForge Adventurer 4".into()),
                machine_name: Some("Adventurer4".into()),
                firmware: Some("v2.2.1-3.7".into()),
                serial: Some("SNADVA1234567".into()),
                mac_address: Some("88:A9:A7:93:86:F8".into()),
            },
            commands: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            updates: watch::channel(0).0,
            connect_calls: AtomicUsize::new(0),
            file_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes for the next `update()` calls.
    pub fn script_updates(&self, steps: impl IntoIterator<Item = Step>) {
        self.update_script.lock().expect("script lock poisoned").extend(steps);
    }

    /// Queue outcomes for the next `connect()` calls.
    pub fn script_connects(&self, steps: impl IntoIterator<Item = Step>) {
        self.connect_script.lock().expect("script lock poisoned").extend(steps);
    }

    pub fn set_status(&self, status: Option<MachineStatus>) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    pub fn set_files(&self, files: Vec<String>) {
        *self.files.lock().expect("files lock poisoned") = files;
    }

    /// Park every subsequent `update()` until `release_updates` is called.
    pub fn hold_updates(&self) {
        *self.gate.lock().expect("gate lock poisoned") = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` parked `update()` calls proceed.
    pub fn release_updates(&self, n: usize) {
        if let Some(gate) = self.gate.lock().expect("gate lock poisoned").as_ref() {
            gate.add_permits(n);
        }
    }

    /// Wait until at least `n` `update()` calls have started.
    pub async fn wait_for_updates(&self, n: usize) {
        let mut rx = self.updates.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        *self.updates.borrow()
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Commands sent so far, e.g. `["pause", "print a.gx"]`.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock poisoned").clone()
    }

    fn record(&self, command: String) -> String {
        self.commands.lock().expect("commands lock poisoned").push(command.clone());
        format!("CMD {command} Received.\r\nok")
    }
}

#[async_trait]
impl crate::client::PrinterClient for ScriptedPrinter {
    fn mark_disconnected(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.connect_script.lock().expect("script lock poisoned").pop_front();
        step.unwrap_or(Step::Ok).into_result()
    }

    async fn update(&self) -> Result<()> {
        self.updates.send_modify(|count| *count += 1);

        let gate = self.gate.lock().expect("gate lock poisoned").clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| ForgeError::Connection(e.to_string()))?
                .forget();
        }

        let step = self.update_script.lock().expect("script lock poisoned").pop_front();
        step.unwrap_or(Step::Ok).into_result()
    }

    async fn file_names(&self) -> Result<Vec<String>> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.lock().expect("files lock poisoned").clone())
    }

    fn machine_status(&self) -> Option<MachineStatus> {
        self.status.lock().expect("status lock poisoned").clone()
    }

    fn telemetry(&self) -> Telemetry {
        self.telemetry.lock().expect("telemetry lock poisoned").clone()
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    async fn send_pause(&self) -> Result<String> {
        Ok(self.record("pause".into()))
    }

    async fn send_continue(&self) -> Result<String> {
        Ok(self.record("continue".into()))
    }

    async fn send_abort(&self) -> Result<String> {
        Ok(self.record("abort".into()))
    }

    async fn send_print(&self, file: &str) -> Result<String> {
        Ok(self.record(format!("print {file}")))
    }

    async fn set_led(&self, on: bool) -> Result<()> {
        self.record(format!("led {}", if on { "on" } else { "off" }));
        self.telemetry.lock().expect("telemetry lock poisoned").led = Some(on);
        Ok(())
    }

    async fn camera_stream_url(&self) -> Result<String> {
        Ok("http://127.0.0.1:8080/?action=stream".into())
    }
}
