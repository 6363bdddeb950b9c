// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device setup and teardown.
//
// A device is "set up" once its coordinator has completed the first refresh
// and the interval timer is running. A transient failure of the first refresh
// is not fatal: setup waits (exponential backoff with jitter) and tries again
// with a fresh coordinator, up to `SetupBackoff::max_attempts`.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use forgelink_core::config::DeviceConfig;
use forgelink_core::error::Result;
use forgelink_printer::{PrinterClient, SetupBackoff, UpdateCoordinator};

/// Bring one configured printer online.
///
/// Returns the running coordinator. Non-transient first-refresh errors and
/// exhausted attempts are returned to the caller.
#[instrument(skip(client, config, backoff), fields(device = %config.name, address = %config.address()))]
pub async fn setup_device<C: PrinterClient>(
    client: Arc<C>,
    config: &DeviceConfig,
    backoff: SetupBackoff,
) -> Result<UpdateCoordinator<C>> {
    let mut attempt = 0;
    let coordinator = loop {
        let coordinator = UpdateCoordinator::new(
            config.coordinator_name(),
            Arc::clone(&client),
            config.coordinator_config(),
        );
        match coordinator.first_refresh().await {
            Ok(()) => break coordinator,
            Err(e) => match backoff.next_delay(&e, attempt) {
                Some(delay) => {
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "printer not responding, will retry setup"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(attempt = attempt + 1, error = %e, "device setup failed");
                    return Err(e);
                }
            },
        }
    };

    coordinator.start()?;
    if let Err(e) = coordinator.request_refresh().await {
        warn!(error = %e, "post-setup refresh failed");
    }

    info!(attempts = attempt + 1, "device set up");
    Ok(coordinator)
}

/// Take a device offline. Any in-flight refresh completes first.
pub async fn teardown<C: PrinterClient>(coordinator: &UpdateCoordinator<C>) {
    coordinator.shutdown().await;
    info!(coordinator = %coordinator.name(), "device torn down");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use forgelink_core::error::ForgeError;
    use forgelink_printer::Lifecycle;
    use forgelink_printer::testing::{ScriptedPrinter, Step};

    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig {
            ip_address: "192.168.0.64".into(),
            name: "Adventurer4".into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_first_refresh_is_retried_with_fresh_coordinator() {
        let printer = Arc::new(ScriptedPrinter::new());
        printer.script_updates([Step::Timeout, Step::ConnectionLost]);

        let coordinator = setup_device(Arc::clone(&printer), &config(), SetupBackoff::default())
            .await
            .unwrap();

        // three setup attempts, then the post-setup refresh
        assert_eq!(printer.disconnect_calls(), 3);
        assert_eq!(printer.update_calls(), 4);
        assert!(coordinator.last_update_success());
        assert_eq!(coordinator.consecutive_failures(), 0);

        teardown(&coordinator).await;
        assert_eq!(coordinator.state().lifecycle, Lifecycle::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_aborts_setup() {
        let printer = Arc::new(ScriptedPrinter::new());
        printer.script_updates([Step::ProtocolError]);

        let err = setup_device(Arc::clone(&printer), &config(), SetupBackoff::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Protocol(_)));
        assert_eq!(printer.update_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn setup_gives_up_after_max_attempts() {
        let printer = Arc::new(ScriptedPrinter::new());
        printer.script_connects([Step::Timeout, Step::Timeout, Step::Timeout]);
        let backoff = SetupBackoff {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        let err = setup_device(Arc::clone(&printer), &config(), backoff)
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Timeout(_)));
        assert_eq!(printer.connect_calls(), 2);
        assert_eq!(printer.update_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_refresh_runs_after_setup() {
        let printer = Arc::new(ScriptedPrinter::new());
        let coordinator = setup_device(Arc::clone(&printer), &config(), SetupBackoff::default())
            .await
            .unwrap();
        assert_eq!(printer.update_calls(), 2);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(printer.update_calls(), 4);

        teardown(&coordinator).await;
    }
}
