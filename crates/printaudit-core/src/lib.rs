// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintAudit — core types, the job store seam, errors and configuration
// shared across all crates.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{AgentConfig, CollectorEndpoint, FieldLayout};
pub use error::{AgentError, FaultClass};
pub use store::JobStore;
pub use types::*;
