// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Forgelink: FlashForge printer bridge
//
// Entry point. Initialises logging, loads the device configuration, brings the
// device up against the simulated printer and logs every coordinator update
// through the entity projections until Ctrl-C.
//
// Usage: forgelink [CONFIG.json]

use std::process::ExitCode;
use std::sync::Arc;

use forgelink_app::entities::{ButtonKind, DeviceEntities};
use forgelink_app::services::setup::{setup_device, teardown};
use forgelink_app::simulated::SimulatedPrinter;
use forgelink_core::config::DeviceConfig;
use forgelink_printer::SetupBackoff;

/// Inject a simulated timeout on every Nth update (unset or 0: never).
const FAIL_EVERY_ENV: &str = "FORGELINK_SIM_FAIL_EVERY";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Forgelink starting");

    let config = match std::env::args().nth(1) {
        Some(path) => match DeviceConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(path = %path, error = %e, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => {
            tracing::info!("no configuration given, using defaults");
            DeviceConfig::default()
        }
    };

    let fail_every = std::env::var(FAIL_EVERY_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let client = Arc::new(SimulatedPrinter::new(config.ip_address.clone()).with_fail_every(fail_every));

    let coordinator = match setup_device(client, &config, SetupBackoff::default()).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "device setup failed");
            return ExitCode::FAILURE;
        }
    };

    let entities = match DeviceEntities::setup(&coordinator, &config).await {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "entity setup failed");
            teardown(&coordinator).await;
            return ExitCode::FAILURE;
        }
    };
    let view = Arc::clone(&entities);
    let listener = coordinator.add_listener(move |state| view.on_update(state));
    entities.on_update(&coordinator.state());

    // Start a job so the telemetry has something to show.
    let selected = entities
        .select
        .lock()
        .expect("select lock poisoned")
        .current_option()
        .map(str::to_string);
    if let Some(file) = selected {
        match entities.press(ButtonKind::PrintFile).await {
            Ok(_) => tracing::info!(file = %file, "demo print started"),
            Err(e) => tracing::warn!(error = %e, "demo print refused"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C");
    }

    tracing::info!("shutting down");
    coordinator.remove_listener(listener);
    teardown(&coordinator).await;
    ExitCode::SUCCESS
}
