// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: brings a configured printer up and down.
//
// Setup owns the retry of the mandatory first refresh; the coordinator itself
// never retries it.

pub mod setup;
