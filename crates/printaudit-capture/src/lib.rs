// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintAudit Capture — turns operating-system print completion events into
// queued job records.  The OS surface (event log, printer configuration) is
// reached through traits so the pipeline runs against scripted doubles in
// tests and against PowerShell on a real Windows host.

pub mod connection;
pub mod event_log;
pub mod host;
pub mod monitor;
pub mod normalizer;
pub mod powershell;

pub use connection::{PowerShellPortLookup, PrinterConnectionResolver, PrinterPortLookup};
pub use event_log::{PowerShellEventLog, PrintEventLog};
pub use host::HostIdentityResolver;
pub use monitor::{MonitorSettings, PrintEventMonitor, ProcessedEvents};
pub use normalizer::JobNormalizer;
pub use powershell::PowerShell;
