// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Entity projections over the coordinator's published state.
//
// Every entity here is a plain read of `CoordinatorState` (or a thin action
// that goes back through the printer client). None of them talk to the device
// while rendering, and all of them report "unavailable" while the coordinator
// does.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use forgelink_core::config::DeviceConfig;
use forgelink_core::error::{ForgeError, Result};
use forgelink_core::types::{Snapshot, ToolTemperature};
use forgelink_printer::{CoordinatorState, PrinterClient, UpdateCoordinator, commands, extract_jpeg};

/// Rendered value of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:.1}"),
        }
    }
}

/// A printer-wide sensor: key plus how to read it from a snapshot.
#[derive(Debug)]
pub struct SensorDescription {
    pub key: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
    pub value: fn(&Snapshot) -> Option<SensorValue>,
}

/// Per-tool temperature sensor description.
#[derive(Debug)]
pub struct TempSensorDescription {
    /// Appended to the tool name, e.g. `extruder_current`.
    pub key: &'static str,
    pub value: fn(&ToolTemperature) -> f64,
}

pub const CELSIUS: &str = "°C";

pub static SENSORS: &[SensorDescription] = &[
    SensorDescription {
        key: "status",
        icon: "mdi:printer-3d",
        unit: None,
        value: |s| s.status.as_ref().map(|st| SensorValue::Text(st.to_string())),
    },
    SensorDescription {
        key: "job_percentage",
        icon: "mdi:file-percent",
        unit: Some("%"),
        value: |s| s.telemetry.print_percent.map(|p| SensorValue::Integer(p.into())),
    },
    SensorDescription {
        key: "file",
        icon: "mdi:file-cad",
        unit: None,
        value: |s| s.telemetry.job_file.clone().map(SensorValue::Text),
    },
    SensorDescription {
        key: "layers",
        icon: "mdi:layers-triple",
        unit: None,
        value: |s| s.telemetry.job_layers.map(|n| SensorValue::Integer(n.into())),
    },
    SensorDescription {
        key: "print_layer",
        icon: "mdi:layers-edit",
        unit: None,
        value: |s| s.telemetry.print_layer.map(|n| SensorValue::Integer(n.into())),
    },
    SensorDescription {
        key: "print_status",
        icon: "mdi:printer-3d",
        unit: None,
        value: |s| s.telemetry.print_status.clone().map(SensorValue::Text),
    },
    SensorDescription {
        key: "move_mode",
        icon: "mdi:move-resize",
        unit: None,
        value: |s| s.telemetry.move_mode.clone().map(SensorValue::Text),
    },
];

pub static TEMP_SENSORS: &[TempSensorDescription] = &[
    TempSensorDescription {
        key: "_current",
        value: |t| t.current,
    },
    TempSensorDescription {
        key: "_target",
        value: |t| t.target,
    },
];

/// Python-style title casing: a letter is upper-cased when it does not follow
/// another letter, lower-cased otherwise.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Naming inputs shared by every entity of one device.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    /// Prefix of every entity unique id.
    pub unique_id: String,
    /// Device title used in sensor display names.
    pub title: String,
}

impl DeviceContext {
    /// Unique id from config, else the printer serial, else the entry id.
    pub fn new(config: &DeviceConfig, serial: Option<&str>) -> Self {
        let unique_id = config
            .unique_id
            .clone()
            .or_else(|| serial.map(str::to_string))
            .unwrap_or_else(|| config.entry_id.to_string());
        Self {
            unique_id,
            title: config.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SensorSource {
    Printer(&'static SensorDescription),
    Tool {
        bed: bool,
        index: usize,
        description: &'static TempSensorDescription,
    },
}

/// One sensor entity.
#[derive(Debug, Clone)]
pub struct Sensor {
    pub unique_id: String,
    pub name: String,
    pub unit: Option<&'static str>,
    source: SensorSource,
}

impl Sensor {
    fn new(ctx: &DeviceContext, prefix: &str, key: &str, unit: Option<&'static str>, source: SensorSource) -> Self {
        Self {
            unique_id: format!("{}_{prefix}{key}", ctx.unique_id),
            name: format!("{} {}{}", ctx.title, title_case(prefix), title_case(&key.replace('_', " "))),
            unit,
            source,
        }
    }

    /// Current value, or `None` while the device is unavailable.
    pub fn value(&self, state: &CoordinatorState) -> Option<SensorValue> {
        if !state.is_available() {
            return None;
        }
        let snapshot = state.snapshot.as_deref()?;
        match self.source {
            SensorSource::Printer(description) => (description.value)(snapshot),
            SensorSource::Tool { bed, index, description } => {
                let tools = if bed {
                    &snapshot.telemetry.beds
                } else {
                    &snapshot.telemetry.extruders
                };
                tools
                    .get(index)
                    .map(|tool| SensorValue::Float((description.value)(tool)))
            }
        }
    }
}

/// Build the sensor set for a device.
///
/// Temperature sensors are created per tool present in `snapshot`; tools are
/// numbered (`extruder0`, `extruder1`, ...) only when there is more than one.
pub fn build_sensors(ctx: &DeviceContext, snapshot: Option<&Snapshot>) -> Vec<Sensor> {
    let mut sensors = Vec::new();

    if let Some(snapshot) = snapshot {
        for (bed, label, count) in [
            (false, "extruder", snapshot.telemetry.extruders.len()),
            (true, "bed", snapshot.telemetry.beds.len()),
        ] {
            for index in 0..count {
                let prefix = if count > 1 {
                    format!("{label}{index}")
                } else {
                    label.to_string()
                };
                for description in TEMP_SENSORS {
                    let source = SensorSource::Tool { bed, index, description };
                    sensors.push(Sensor::new(ctx, &prefix, description.key, Some(CELSIUS), source));
                }
            }
        }
    }

    for description in SENSORS {
        sensors.push(Sensor::new(
            ctx,
            "",
            description.key,
            description.unit,
            SensorSource::Printer(description),
        ));
    }
    sensors
}

/// File picker for the print button.
#[derive(Debug, Clone)]
pub struct FileSelect {
    pub unique_id: String,
    options: Vec<String>,
    current: Option<String>,
}

impl FileSelect {
    pub fn new(ctx: &DeviceContext, files: Vec<String>) -> Self {
        let current = files.first().cloned();
        Self {
            unique_id: format!("{}_select", ctx.unique_id),
            options: files,
            current,
        }
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn current_option(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Pick a file. Unknown names are ignored and reported as `false`.
    pub fn select_option(&mut self, option: &str) -> bool {
        if self.options.iter().any(|o| o == option) {
            self.current = Some(option.to_string());
            true
        } else {
            warn!(option, "not a file on the printer");
            false
        }
    }

    /// Follow the printer's file list; the selection survives if the file
    /// is still there, else falls back to the first file.
    pub fn sync(&mut self, snapshot: &Snapshot) {
        if self.options == snapshot.files {
            return;
        }
        self.options = snapshot.files.clone();
        let still_present = self
            .current
            .as_ref()
            .is_some_and(|c| self.options.contains(c));
        if !still_present {
            self.current = self.options.first().cloned();
        }
        debug!(files = self.options.len(), "file list changed");
    }
}

/// Job control buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Abort,
    Continue,
    Pause,
    PrintFile,
}

impl ButtonKind {
    pub const ALL: [ButtonKind; 4] = [Self::Abort, Self::Continue, Self::Pause, Self::PrintFile];

    pub fn key(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Continue => "continue",
            Self::Pause => "pause",
            Self::PrintFile => "print_file",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Abort => "mdi:stop",
            Self::Continue => "mdi:play",
            Self::Pause => "mdi:pause",
            Self::PrintFile => "mdi:printer-3d-nozzle",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Button {
    pub kind: ButtonKind,
    pub unique_id: String,
    pub name: String,
}

impl Button {
    pub fn new(ctx: &DeviceContext, kind: ButtonKind) -> Self {
        Self {
            kind,
            unique_id: format!("{}_{}", ctx.unique_id, kind.key()),
            name: title_case(&kind.key().replace('_', " ")),
        }
    }

    /// Send the button's command. `PrintFile` prints the selected file.
    pub async fn press<C: PrinterClient + ?Sized>(
        &self,
        client: &C,
        selected: Option<&str>,
    ) -> Result<String> {
        let reply = match self.kind {
            ButtonKind::Abort => commands::abort(client).await?,
            ButtonKind::Continue => commands::continue_print(client).await?,
            ButtonKind::Pause => commands::pause(client).await?,
            ButtonKind::PrintFile => {
                let file = selected.ok_or(ForgeError::NoFileSelected)?;
                commands::print_file(client, file).await?
            }
        };
        debug!(button = self.kind.key(), reply = %reply, "printer responded");
        Ok(reply)
    }
}

/// The printer's LED strip.
#[derive(Debug, Clone)]
pub struct Light {
    pub unique_id: String,
    pub name: &'static str,
}

impl Light {
    pub fn new(ctx: &DeviceContext) -> Self {
        Self {
            unique_id: format!("{}_light", ctx.unique_id),
            name: "Light",
        }
    }

    pub fn is_on(&self, state: &CoordinatorState) -> Option<bool> {
        if !state.is_available() {
            return None;
        }
        state.snapshot.as_ref()?.telemetry.led
    }

    /// Switch the LED, then refresh so the new state is published.
    pub async fn turn<C: PrinterClient>(&self, coordinator: &UpdateCoordinator<C>, on: bool) -> Result<()> {
        coordinator.client().set_led(on).await?;
        coordinator.request_refresh().await
    }
}

/// The printer's MJPEG camera.
#[derive(Debug, Clone)]
pub struct Camera {
    pub unique_id: String,
    pub name: String,
    pub stream_url: String,
}

impl Camera {
    /// Resolves the stream URL once; it does not change while the device is
    /// set up.
    pub async fn new<C: PrinterClient>(ctx: &DeviceContext, coordinator: &UpdateCoordinator<C>) -> Result<Self> {
        let stream_url = coordinator.client().camera_stream_url().await?;
        let machine_name = coordinator
            .device_identity()
            .machine_name
            .unwrap_or_else(|| ctx.title.clone());
        Ok(Self {
            unique_id: format!("{}_camera", ctx.unique_id),
            name: format!("{machine_name} Camera"),
            stream_url,
        })
    }

    pub fn is_available(&self, state: &CoordinatorState) -> bool {
        state.last_update_success
    }

    /// First frame of the stream, or `None` while the camera is offline.
    pub fn still_image<I, B>(&self, state: &CoordinatorState, chunks: I) -> Option<Vec<u8>>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        if !self.is_available(state) {
            warn!(camera = %self.name, "unable to get still image while camera is offline");
            return None;
        }
        extract_jpeg(chunks)
    }
}

/// Every entity of one device, wired to its coordinator.
pub struct DeviceEntities<C: PrinterClient> {
    coordinator: UpdateCoordinator<C>,
    pub sensors: Vec<Sensor>,
    pub select: Mutex<FileSelect>,
    pub buttons: Vec<Button>,
    pub light: Light,
    pub camera: Camera,
}

impl<C: PrinterClient> DeviceEntities<C> {
    /// Build all entities from the coordinator's current state.
    pub async fn setup(coordinator: &UpdateCoordinator<C>, config: &DeviceConfig) -> Result<Arc<Self>> {
        let identity = coordinator.device_identity();
        let ctx = DeviceContext::new(config, identity.serial.as_deref());
        let snapshot = coordinator.snapshot();

        let sensors = build_sensors(&ctx, snapshot.as_deref());
        let files = snapshot.as_ref().map(|s| s.files.clone()).unwrap_or_default();
        let camera = Camera::new(&ctx, coordinator).await?;

        info!(
            unique_id = %ctx.unique_id,
            sensors = sensors.len(),
            files = files.len(),
            "entities created"
        );

        Ok(Arc::new(Self {
            coordinator: coordinator.clone(),
            sensors,
            select: Mutex::new(FileSelect::new(&ctx, files)),
            buttons: ButtonKind::ALL.iter().map(|&k| Button::new(&ctx, k)).collect(),
            light: Light::new(&ctx),
            camera,
        }))
    }

    pub fn coordinator(&self) -> &UpdateCoordinator<C> {
        &self.coordinator
    }

    /// Listener body: follow the file list and log the rendered entities.
    pub fn on_update(&self, state: &CoordinatorState) {
        if let Some(snapshot) = state.snapshot.as_deref().filter(|_| state.is_available()) {
            self.select.lock().expect("select lock poisoned").sync(snapshot);
        }

        if !state.is_available() {
            warn!(
                reason = state.last_error.as_deref().unwrap_or("unknown"),
                "printer unavailable"
            );
            return;
        }
        for (name, value) in self.render(state) {
            info!(entity = %name, value = %value, "state");
        }
    }

    /// `(display name, rendered value)` for every sensor plus the light and
    /// camera.
    pub fn render(&self, state: &CoordinatorState) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .sensors
            .iter()
            .map(|s| {
                let value = match s.value(state) {
                    Some(v) => match s.unit {
                        Some(unit) => format!("{v} {unit}"),
                        None => v.to_string(),
                    },
                    None => "unavailable".into(),
                };
                (s.name.clone(), value)
            })
            .collect();

        let light = match self.light.is_on(state) {
            Some(true) => "on",
            Some(false) => "off",
            None => "unavailable",
        };
        out.push((self.light.name.to_string(), light.into()));
        let camera = if self.camera.is_available(state) { "streaming" } else { "offline" };
        out.push((self.camera.name.clone(), camera.into()));
        out
    }

    /// Press a button by kind; print uses the current file selection.
    pub async fn press(&self, kind: ButtonKind) -> Result<String> {
        let selected = self
            .select
            .lock()
            .expect("select lock poisoned")
            .current_option()
            .map(str::to_string);
        let button = self
            .buttons
            .iter()
            .find(|b| b.kind == kind)
            .ok_or_else(|| ForgeError::Config(format!("no {} button", kind.key())))?;
        button.press(self.coordinator.client().as_ref(), selected.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use forgelink_core::types::{MachineStatus, Telemetry};
    use forgelink_printer::testing::{ScriptedPrinter, Step};
    use forgelink_core::config::CoordinatorConfig;

    use super::*;

    fn ctx() -> DeviceContext {
        DeviceContext {
            unique_id: "SNADVA1234567".into(),
            title: "Adventurer4".into(),
        }
    }

    async fn ready() -> (Arc<ScriptedPrinter>, UpdateCoordinator<ScriptedPrinter>) {
        let printer = Arc::new(ScriptedPrinter::new());
        let coordinator =
            UpdateCoordinator::new("FlashForge-test", Arc::clone(&printer), CoordinatorConfig::default());
        coordinator.first_refresh().await.unwrap();
        (printer, coordinator)
    }

    fn config() -> DeviceConfig {
        DeviceConfig {
            name: "Adventurer4".into(),
            ..Default::default()
        }
    }

    #[test]
    fn title_case_matches_display_names() {
        assert_eq!(title_case(" job percentage"), " Job Percentage");
        assert_eq!(title_case("extruder0"), "Extruder0");
        assert_eq!(title_case("print file"), "Print File");
    }

    #[test]
    fn device_context_prefers_configured_id_then_serial() {
        let mut config = config();
        assert_eq!(DeviceContext::new(&config, Some("SN1")).unique_id, "SN1");
        config.unique_id = Some("custom".into());
        assert_eq!(DeviceContext::new(&config, Some("SN1")).unique_id, "custom");
        config.unique_id = None;
        assert_eq!(
            DeviceContext::new(&config, None).unique_id,
            config.entry_id.to_string()
        );
    }

    #[tokio::test]
    async fn sensors_are_named_and_read_from_snapshot() {
        let (_printer, coordinator) = ready().await;
        let state = coordinator.state();
        let sensors = build_sensors(&ctx(), state.snapshot.as_deref());

        // 2 temps for one extruder, 2 for one bed, then the printer table
        assert_eq!(sensors.len(), 4 + SENSORS.len());

        let ids: Vec<&str> = sensors.iter().map(|s| s.unique_id.as_str()).collect();
        assert!(ids.contains(&"SNADVA1234567_extruder_current"));
        assert!(ids.contains(&"SNADVA1234567_bed_target"));
        assert!(ids.contains(&"SNADVA1234567_job_percentage"));

        let extruder = &sensors[0];
        assert_eq!(extruder.name, "Adventurer4 Extruder Current");
        assert_eq!(extruder.value(&state), Some(SensorValue::Float(198.0)));

        let status = sensors.iter().find(|s| s.unique_id.ends_with("_status")).unwrap();
        assert_eq!(status.name, "Adventurer4 Status");
        assert_eq!(status.value(&state), Some(SensorValue::Text("READY".into())));

        let progress = sensors.iter().find(|s| s.unique_id.ends_with("_job_percentage")).unwrap();
        assert_eq!(progress.name, "Adventurer4 Job Percentage");
        assert_eq!(progress.unit, Some("%"));
    }

    #[test]
    fn multiple_tools_are_numbered() {
        let snapshot = Snapshot::new(
            Some(MachineStatus::Ready),
            vec![],
            Telemetry {
                extruders: vec![
                    ToolTemperature { name: "T0".into(), current: 200.0, target: 210.0 },
                    ToolTemperature { name: "T1".into(), current: 25.0, target: 0.0 },
                ],
                ..Default::default()
            },
        );
        let sensors = build_sensors(&ctx(), Some(&snapshot));
        let ids: Vec<&str> = sensors.iter().map(|s| s.unique_id.as_str()).collect();
        assert!(ids.contains(&"SNADVA1234567_extruder0_current"));
        assert!(ids.contains(&"SNADVA1234567_extruder1_target"));
        assert!(!ids.iter().any(|id| id.contains("bed")));
    }

    #[tokio::test]
    async fn entities_go_unavailable_with_coordinator() {
        let (printer, coordinator) = ready().await;
        let entities = DeviceEntities::setup(&coordinator, &config()).await.unwrap();
        assert_eq!(entities.light.is_on(&coordinator.state()), Some(true));

        printer.script_updates(std::iter::repeat_n(Step::Timeout, 4));
        coordinator.request_refresh().await.unwrap();

        let state = coordinator.state();
        assert!(entities.sensors.iter().all(|s| s.value(&state).is_none()));
        assert_eq!(entities.light.is_on(&state), None);
        assert!(!entities.camera.is_available(&state));
        assert!(entities.camera.still_image(&state, [[0xFF_u8, 0xD8, 0xFF, 0xD9]]).is_none());

        let rendered = entities.render(&state);
        assert!(rendered.iter().any(|(_, v)| v == "unavailable"));
    }

    #[tokio::test]
    async fn select_follows_file_list() {
        let (printer, coordinator) = ready().await;
        let mut select = FileSelect::new(&ctx(), vec!["a.gx".into(), "b.gx".into()]);
        assert_eq!(select.unique_id, "SNADVA1234567_select");
        assert_eq!(select.current_option(), Some("a.gx"));
        assert!(select.select_option("b.gx"));
        assert!(!select.select_option("missing.gx"));

        printer.set_files(vec!["/data/b.gx".into(), "/data/c.gx".into()]);
        coordinator.request_refresh().await.unwrap();
        select.sync(&coordinator.snapshot().unwrap());
        assert_eq!(select.current_option(), Some("b.gx"));

        printer.set_files(vec!["/data/c.gx".into()]);
        coordinator.request_refresh().await.unwrap();
        select.sync(&coordinator.snapshot().unwrap());
        assert_eq!(select.options(), ["c.gx"]);
        assert_eq!(select.current_option(), Some("c.gx"));
    }

    #[tokio::test]
    async fn buttons_send_commands() {
        let (printer, coordinator) = ready().await;
        let entities = DeviceEntities::setup(&coordinator, &config()).await.unwrap();

        let names: Vec<&str> = entities.buttons.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["Abort", "Continue", "Pause", "Print File"]);
        assert_eq!(entities.buttons[3].unique_id, "SNADVA1234567_print_file");

        entities.press(ButtonKind::Pause).await.unwrap();
        entities.press(ButtonKind::PrintFile).await.unwrap();
        assert_eq!(printer.commands(), vec!["pause", "print a.gx"]);

        printer.set_status(Some(MachineStatus::BuildingFromSd));
        let err = entities.press(ButtonKind::PrintFile).await.unwrap_err();
        assert!(matches!(err, ForgeError::NotReady(_)));
    }

    #[tokio::test]
    async fn print_button_without_selection_fails() {
        let printer = ScriptedPrinter::new();
        let button = Button::new(&ctx(), ButtonKind::PrintFile);
        let err = button.press(&printer, None).await.unwrap_err();
        assert!(matches!(err, ForgeError::NoFileSelected));
        assert!(printer.commands().is_empty());
    }

    #[tokio::test]
    async fn light_switch_refreshes_state() {
        let (printer, coordinator) = ready().await;
        let light = Light::new(&ctx());
        assert_eq!(light.unique_id, "SNADVA1234567_light");

        light.turn(&coordinator, false).await.unwrap();

        assert_eq!(light.is_on(&coordinator.state()), Some(false));
        assert_eq!(printer.commands(), vec!["led off"]);
        assert_eq!(printer.update_calls(), 2);
    }

    #[tokio::test]
    async fn camera_named_after_machine() {
        let (_printer, coordinator) = ready().await;
        let camera = Camera::new(&ctx(), &coordinator).await.unwrap();
        assert_eq!(camera.name, "Adventurer4 Camera");
        assert_eq!(camera.unique_id, "SNADVA1234567_camera");

        let frame = camera.still_image(&coordinator.state(), [&b"--x\r\n\xFF\xD8\x01\xFF\xD9"[..]]);
        assert_eq!(frame, Some(vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]));
    }
}
