// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Forgelink.

use thiserror::Error;

/// Top-level error type for all Forgelink operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    // -- Transport errors (raised by the printer client) --
    #[error("printer connection failed: {0}")]
    Connection(String),

    #[error("printer request timed out: {0}")]
    Timeout(String),

    #[error("printer protocol error: {0}")]
    Protocol(String),

    // -- Printer state --
    #[error("printer status is not READY (current: {0})")]
    NotReady(String),

    #[error("no file selected")]
    NoFileSelected,

    // -- Coordinator lifecycle --
    #[error("coordinator has not completed its first refresh")]
    NotInitialized,

    #[error("coordinator has been shut down")]
    ShutDown,

    #[error("refresh task failed: {0}")]
    Task(String),

    // -- Configuration / persistence --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ForgeError>;
