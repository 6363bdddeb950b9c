// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Forgelink App: host-side glue: device setup with setup-retry, the entity
// projections a host registers, and a simulated printer for running without
// hardware.

pub mod entities;
pub mod services;
pub mod simulated;
