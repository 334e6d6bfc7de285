// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintAudit Delivery — the durable local job queue and everything that
// moves its contents to the remote collector.

pub mod collector;
pub mod memory;
pub mod queue;
pub mod reconciler;

pub use collector::{Collector, HttpCollector, SubmitReceipt};
pub use memory::MemoryJobStore;
pub use queue::SqliteJobQueue;
pub use reconciler::{CycleReport, DeliveryOutcome, DeliveryReconciler};
