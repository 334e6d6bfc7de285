// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job store with the same semantics as the SQLite queue.  Used by
// tests across the workspace and as a fallback when the data directory is
// not writable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use printaudit_core::error::{AgentError, Result};
use printaudit_core::store::JobStore;
use printaudit_core::types::{PrintJobRecord, QueueId, QueuedJobRecord};

#[derive(Debug, Default)]
struct Rows {
    next_id: i64,
    rows: Vec<QueuedJobRecord>,
}

/// Volatile `JobStore`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Rows>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a database error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert with an explicit persistence time.
    pub fn enqueue_at(&self, job: &PrintJobRecord, created_at: DateTime<Utc>) -> Result<QueueId> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = QueueId(inner.next_id);
        inner.rows.push(QueuedJobRecord {
            id,
            job: job.clone(),
            sent: false,
            created_at,
        });
        Ok(id)
    }

    /// Snapshot of every row, in insertion order.
    pub fn all(&self) -> Vec<QueuedJobRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AgentError::Database("store unavailable".into()));
        }
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl JobStore for MemoryJobStore {
    fn enqueue(&self, job: &PrintJobRecord) -> Result<QueueId> {
        self.enqueue_at(job, Utc::now())
    }

    fn dequeue_pending(&self, limit: usize) -> Result<Vec<QueuedJobRecord>> {
        let inner = self.lock()?;
        Ok(inner.rows.iter().filter(|r| !r.sent).take(limit).cloned().collect())
    }

    fn mark_sent(&self, ids: &[QueueId]) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut changed = 0;
        for row in inner.rows.iter_mut().filter(|r| !r.sent && ids.contains(&r.id)) {
            row.sent = true;
            changed += 1;
        }
        Ok(changed)
    }

    fn prune_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.rows.len();
        inner.rows.retain(|r| !(r.sent && r.created_at < cutoff));
        Ok(before - inner.rows.len())
    }

    fn pending_count(&self) -> Result<u64> {
        Ok(self.lock()?.rows.iter().filter(|r| !r.sent).count() as u64)
    }

    fn sent_count(&self) -> Result<u64> {
        Ok(self.lock()?.rows.iter().filter(|r| r.sent).count() as u64)
    }
}
