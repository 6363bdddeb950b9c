// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command actions exposed to the host as services.
//
// Every action re-establishes the control session first, then sends exactly
// one command. Commands are never retried: a failure reaches the caller as-is.

use tracing::{info, instrument, warn};

use forgelink_core::error::{ForgeError, Result};
use forgelink_core::types::{MachineStatus, strip_storage_prefix};

use crate::client::PrinterClient;

/// Pause the running job. Returns the printer's reply.
#[instrument(skip(client))]
pub async fn pause<C: PrinterClient + ?Sized>(client: &C) -> Result<String> {
    client.connect().await?;
    let reply = client.send_pause().await?;
    info!("pause sent");
    Ok(reply)
}

/// Resume a paused job.
#[instrument(skip(client))]
pub async fn continue_print<C: PrinterClient + ?Sized>(client: &C) -> Result<String> {
    client.connect().await?;
    let reply = client.send_continue().await?;
    info!("continue sent");
    Ok(reply)
}

/// Abort the running job.
#[instrument(skip(client))]
pub async fn abort<C: PrinterClient + ?Sized>(client: &C) -> Result<String> {
    client.connect().await?;
    let reply = client.send_abort().await?;
    info!("abort sent");
    Ok(reply)
}

/// Start printing a stored file.
///
/// The printer only accepts a new job while READY; any other status is
/// refused with `ForgeError::NotReady` without sending anything.
#[instrument(skip(client))]
pub async fn print_file<C: PrinterClient + ?Sized>(client: &C, file: &str) -> Result<String> {
    if file.trim().is_empty() {
        return Err(ForgeError::NoFileSelected);
    }

    client.connect().await?;
    match client.machine_status() {
        Some(MachineStatus::Ready) => {}
        other => {
            let current = other.map_or_else(|| "unknown".to_string(), |s| s.to_string());
            warn!(status = %current, "printer busy, print refused");
            return Err(ForgeError::NotReady(current));
        }
    }

    let reply = client.send_print(file).await?;
    info!(file, "print started");
    Ok(reply)
}

/// Files stored on the printer, storage prefix stripped.
#[instrument(skip(client))]
pub async fn get_file_names<C: PrinterClient + ?Sized>(client: &C) -> Result<Vec<String>> {
    client.connect().await?;
    let files = client.file_names().await?;
    Ok(strip_storage_prefix(files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedPrinter, Step};

    #[tokio::test]
    async fn job_controls_connect_then_send() {
        let printer = ScriptedPrinter::new();

        let reply = pause(&printer).await.unwrap();
        assert!(reply.contains("pause"));
        continue_print(&printer).await.unwrap();
        abort(&printer).await.unwrap();

        assert_eq!(printer.connect_calls(), 3);
        assert_eq!(printer.commands(), vec!["pause", "continue", "abort"]);
    }

    #[tokio::test]
    async fn print_requires_ready() {
        let printer = ScriptedPrinter::new();
        printer.set_status(Some(MachineStatus::BuildingFromSd));

        let err = print_file(&printer, "a.gx").await.unwrap_err();
        assert!(matches!(err, ForgeError::NotReady(ref s) if s == "BUILDING_FROM_SD"));
        assert!(printer.commands().is_empty());

        printer.set_status(Some(MachineStatus::Ready));
        print_file(&printer, "a.gx").await.unwrap();
        assert_eq!(printer.commands(), vec!["print a.gx"]);
    }

    #[tokio::test]
    async fn print_without_file_is_rejected() {
        let printer = ScriptedPrinter::new();
        let err = print_file(&printer, "").await.unwrap_err();
        assert!(matches!(err, ForgeError::NoFileSelected));
        assert_eq!(printer.connect_calls(), 0);
    }

    #[tokio::test]
    async fn connect_failure_is_not_retried() {
        let printer = ScriptedPrinter::new();
        printer.script_connects([Step::Timeout]);

        let err = pause(&printer).await.unwrap_err();
        assert!(matches!(err, ForgeError::Timeout(_)));
        assert_eq!(printer.connect_calls(), 1);
        assert!(printer.commands().is_empty());
    }

    #[tokio::test]
    async fn file_names_are_stripped() {
        let printer = ScriptedPrinter::new();
        let files = get_file_names(&printer).await.unwrap();
        assert_eq!(files, vec!["a.gx", "b.gx"]);
    }
}
