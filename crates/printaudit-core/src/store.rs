// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Repository seam for the durable local queue.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::types::{PrintJobRecord, QueueId, QueuedJobRecord};

/// Durable store of captured jobs with a sent/unsent flag.
///
/// Implementations must keep these invariants: `sent` only ever moves from
/// false to true, rows are never rewritten apart from that flag, and rows are
/// deleted only once sent and older than the prune cutoff.
pub trait JobStore: Send + Sync {
    /// Persist one job as unsent, stamped with the current time.
    fn enqueue(&self, job: &PrintJobRecord) -> Result<QueueId>;

    /// Up to `limit` unsent rows, oldest first.
    fn dequeue_pending(&self, limit: usize) -> Result<Vec<QueuedJobRecord>>;

    /// Flag exactly these ids as sent. Unknown ids are ignored. Returns the
    /// number of rows that changed state.
    fn mark_sent(&self, ids: &[QueueId]) -> Result<usize>;

    /// Delete sent rows created strictly before `cutoff`. Returns the number
    /// of rows deleted.
    fn prune_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn pending_count(&self) -> Result<u64>;

    fn sent_count(&self) -> Result<u64>;

    /// Delete sent rows older than `older_than_days`.
    ///
    /// A window reaching past the earliest representable time prunes
    /// nothing.
    fn prune_sent(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = Duration::try_days(i64::from(older_than_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.prune_sent_before(cutoff)
    }
}

impl<T: JobStore + ?Sized> JobStore for std::sync::Arc<T> {
    fn enqueue(&self, job: &PrintJobRecord) -> Result<QueueId> {
        (**self).enqueue(job)
    }

    fn dequeue_pending(&self, limit: usize) -> Result<Vec<QueuedJobRecord>> {
        (**self).dequeue_pending(limit)
    }

    fn mark_sent(&self, ids: &[QueueId]) -> Result<usize> {
        (**self).mark_sent(ids)
    }

    fn prune_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        (**self).prune_sent_before(cutoff)
    }

    fn pending_count(&self) -> Result<u64> {
        (**self).pending_count()
    }

    fn sent_count(&self) -> Result<u64> {
        (**self).sent_count()
    }
}
