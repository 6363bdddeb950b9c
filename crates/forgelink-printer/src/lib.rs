// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Forgelink Printer: the printer client seam, refresh retry policy, update
// coordinator and command actions.  This crate sits between the domain types
// in `forgelink-core` and whatever speaks the printer's wire protocol.

pub mod client;
pub mod commands;
pub mod coordinator;
pub mod mjpeg;
pub mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use client::PrinterClient;
pub use coordinator::{CoordinatorState, Lifecycle, ListenerId, UpdateCoordinator};
pub use mjpeg::extract_jpeg;
pub use retry::{RefreshDecision, RefreshPolicy, SetupBackoff, classify_error};
