// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scheduling loop — `idle → running → draining → stopped`.
//
// Starts the event monitor, then runs one delivery cycle per interval until
// cancelled.  A faulted cycle (store error or panic) is logged and followed
// by the shorter backoff; nothing but cancellation ends the loop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use printaudit_capture::PrintEventMonitor;
use printaudit_core::config::AgentConfig;
use printaudit_core::error::{AgentError, Result};
use printaudit_delivery::{CycleReport, DeliveryReconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub struct SchedulingLoop {
    monitor: Arc<PrintEventMonitor>,
    reconciler: Arc<DeliveryReconciler>,
    interval: Duration,
    backoff: Duration,
    cancel: CancellationToken,
    state: Mutex<LoopState>,
}

impl SchedulingLoop {
    pub fn new(
        monitor: Arc<PrintEventMonitor>,
        reconciler: Arc<DeliveryReconciler>,
        config: &AgentConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_intervals(
            monitor,
            reconciler,
            config.send_interval(),
            config.error_backoff(),
            cancel,
        )
    }

    pub fn with_intervals(
        monitor: Arc<PrintEventMonitor>,
        reconciler: Arc<DeliveryReconciler>,
        interval: Duration,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            monitor,
            reconciler,
            interval,
            backoff,
            cancel,
            state: Mutex::new(LoopState::Idle),
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: LoopState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = *state;
        *state = next;
        debug!(from = %prev, to = %next, "scheduling loop transition");
    }

    /// Run until the cancellation token fires.  Callable once.
    pub async fn run(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != LoopState::Idle {
                return Err(AgentError::Config(format!(
                    "scheduling loop cannot start from state {}",
                    *state
                )));
            }
            *state = LoopState::Running;
        }
        info!(
            interval_secs = self.interval.as_secs(),
            backoff_secs = self.backoff.as_secs(),
            "scheduling loop running"
        );

        if let Err(e) = self.monitor.start().await {
            error!(error = %e, "print event monitor failed to start; delivering queued jobs only");
        }

        while !self.cancel.is_cancelled() {
            let cycle = self.cycle();
            tokio::pin!(cycle);
            let finished = tokio::select! {
                result = &mut cycle => Some(result),
                _ = self.cancel.cancelled() => None,
            };
            let result = match finished {
                Some(result) => result,
                None => {
                    // Capture stops at once; the in-flight cycle still completes.
                    self.drain();
                    cycle.await
                }
            };

            let delay = match result {
                Ok(report) => {
                    debug!(outcome = ?report.outcome, pruned = report.pruned, "cycle complete");
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.reconciler.send_heartbeat().await;
                    self.interval
                }
                Err(e) => {
                    error!(error = %e, class = ?e.class(), "delivery cycle faulted; backing off");
                    self.backoff
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.drain();
        self.set_state(LoopState::Stopped);
        info!("scheduling loop stopped");
        Ok(())
    }

    /// Enter `Draining` and stop capture. Idempotent.
    fn drain(&self) {
        if self.state() == LoopState::Running {
            self.set_state(LoopState::Draining);
        }
        self.monitor.stop();
    }

    /// One reconcile on its own task so a panic surfaces as a fault.
    async fn cycle(&self) -> Result<CycleReport> {
        let reconciler = Arc::clone(&self.reconciler);
        match tokio::spawn(async move { reconciler.reconcile().await }).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "delivery cycle task aborted");
                Err(AgentError::Task(format!("delivery cycle: {e}")))
            }
        }
    }
}
