// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintAudit Agent — the long-lived host process.  Wires capture and
// delivery together and drives them from one scheduling loop.

pub mod logging;
pub mod scheduler;
pub mod service;
pub mod services;

pub use scheduler::{LoopState, SchedulingLoop};
pub use services::agent_services::AgentServices;
