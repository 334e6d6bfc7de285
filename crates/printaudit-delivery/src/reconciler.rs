// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Delivery reconciler — drains the durable queue towards the collector.
//
// One cycle: validate the endpoint, take the oldest unsent batch, send it as
// a single request, mark exactly that batch sent on a 2xx, and prune old
// sent rows no matter how the send went.  A row is never marked sent unless
// the request carrying it succeeded.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use printaudit_core::config::{AgentConfig, CollectorEndpoint};
use printaudit_core::error::{AgentError, Result};
use printaudit_core::store::JobStore;
use printaudit_core::types::{HostIdentity, QueueId};

use crate::collector::Collector;

/// How a delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Endpoint or credential missing; nothing was sent.
    NotConfigured,
    /// Queue had nothing to send.
    Idle,
    /// The batch was accepted and marked sent.
    Delivered { count: usize },
    /// The batch stays unsent and will be retried verbatim.
    Failed { count: usize },
}

/// Result of one `reconcile` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: DeliveryOutcome,
    pub pruned: usize,
}

/// Tunables for the reconciler.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub batch_size: usize,
    pub retention_days: u32,
}

impl From<&AgentConfig> for DeliverySettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            retention_days: cfg.retention(),
        }
    }
}

pub struct DeliveryReconciler {
    store: Arc<dyn JobStore>,
    collector: Arc<dyn Collector>,
    config: AgentConfig,
    settings: DeliverySettings,
    host: HostIdentity,
    cancel: CancellationToken,
}

impl DeliveryReconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        collector: Arc<dyn Collector>,
        config: AgentConfig,
        host: HostIdentity,
        cancel: CancellationToken,
    ) -> Self {
        let settings = DeliverySettings::from(&config);
        Self {
            store,
            collector,
            config,
            settings,
            host,
            cancel,
        }
    }

    /// Run one delivery cycle.
    ///
    /// Transport failures are reported through the outcome, not as errors.
    /// An `Err` means the local store failed.
    pub async fn reconcile(&self) -> Result<CycleReport> {
        let delivery = self.deliver_batch().await;

        // Pruning is independent of how the send went.
        let pruned = match self.prune().await {
            Ok(pruned) => pruned,
            Err(e) => {
                error!(error = %e, class = ?e.class(), "pruning sent jobs failed");
                0
            }
        };

        let outcome = delivery?;
        if let Ok(pending) = self.blocking(|store| store.pending_count()).await {
            debug!(pending, pruned, "delivery cycle finished");
        }
        Ok(CycleReport { outcome, pruned })
    }

    /// Send the liveness signal. Failures are logged only.
    pub async fn send_heartbeat(&self) -> bool {
        let endpoint = match self.config.collector_endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                debug!(reason = %e, "heartbeat skipped");
                return false;
            }
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.collector.heartbeat(&endpoint, &self.host) => r,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "heartbeat failed");
                false
            }
        }
    }

    async fn deliver_batch(&self) -> Result<DeliveryOutcome> {
        let endpoint = match self.config.collector_endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(reason = %e, "collector not configured; set apiBaseUrl and agentToken");
                return Ok(DeliveryOutcome::NotConfigured);
            }
        };

        let limit = self.settings.batch_size;
        let batch = self.blocking(move |store| store.dequeue_pending(limit)).await?;
        if batch.is_empty() {
            return Ok(DeliveryOutcome::Idle);
        }

        let ids: Vec<QueueId> = batch.iter().map(|j| j.id).collect();
        match self.submit(&endpoint, &batch).await {
            Ok(receipt) => {
                if receipt.count.is_some_and(|c| c != ids.len()) {
                    warn!(sent = ids.len(), accepted = ?receipt.count, "collector count differs from batch size");
                }
                let count = ids.len();
                self.blocking(move |store| store.mark_sent(&ids)).await?;
                info!(count, "jobs delivered");
                Ok(DeliveryOutcome::Delivered { count })
            }
            Err(e) => {
                warn!(error = %e, class = ?e.class(), count = ids.len(), "batch delivery failed; will retry");
                Ok(DeliveryOutcome::Failed { count: ids.len() })
            }
        }
    }

    async fn submit(
        &self,
        endpoint: &CollectorEndpoint,
        batch: &[printaudit_core::types::QueuedJobRecord],
    ) -> Result<crate::collector::SubmitReceipt> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.collector.submit_jobs(endpoint, batch) => r,
        }
    }

    async fn prune(&self) -> Result<usize> {
        let days = self.settings.retention_days;
        self.blocking(move |store| store.prune_sent(days)).await
    }

    /// Run a store call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn JobStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| AgentError::Database(format!("store task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SubmitReceipt;
    use crate::memory::MemoryJobStore;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use printaudit_core::types::{JobStatus, PrintJobRecord, QueuedJobRecord};
    use std::sync::Mutex;

    /// Collector double that records every batch and answers with `status`.
    #[derive(Default)]
    struct StubCollector {
        status: Mutex<u16>,
        batches: Mutex<Vec<Vec<QueueId>>>,
        heartbeats: Mutex<usize>,
    }

    impl StubCollector {
        fn answering(status: u16) -> Arc<Self> {
            let stub = Self::default();
            *stub.status.lock().unwrap() = status;
            Arc::new(stub)
        }

        fn calls(&self) -> usize {
            self.batches.lock().unwrap().len() + *self.heartbeats.lock().unwrap()
        }
    }

    #[async_trait]
    impl Collector for StubCollector {
        async fn submit_jobs(
            &self,
            _endpoint: &CollectorEndpoint,
            jobs: &[QueuedJobRecord],
        ) -> Result<SubmitReceipt> {
            self.batches
                .lock()
                .unwrap()
                .push(jobs.iter().map(|j| j.id).collect());
            let status = *self.status.lock().unwrap();
            if (200..300).contains(&status) {
                Ok(SubmitReceipt {
                    success: true,
                    count: Some(jobs.len()),
                })
            } else {
                Err(AgentError::CollectorStatus {
                    status,
                    body: "Internal server error".into(),
                })
            }
        }

        async fn heartbeat(&self, _endpoint: &CollectorEndpoint, _host: &HostIdentity) -> Result<()> {
            *self.heartbeats.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn job(n: usize) -> PrintJobRecord {
        PrintJobRecord {
            timestamp: Utc::now(),
            host_name: "PC-01".into(),
            host_address: "10.0.0.20".into(),
            os_username: "ana".into(),
            printer_name: "HP".into(),
            printer_connection: None,
            job_id: Some(n.to_string()),
            document_name: format!("doc-{n}"),
            pages_printed: 1,
            copies: 1,
            duplex: None,
            color: None,
            status: JobStatus::Completed,
        }
    }

    fn configured() -> AgentConfig {
        AgentConfig {
            api_base_url: "https://collector.test".into(),
            agent_token: "token".into(),
            ..Default::default()
        }
    }

    fn reconciler(
        store: Arc<MemoryJobStore>,
        collector: Arc<StubCollector>,
        config: AgentConfig,
    ) -> DeliveryReconciler {
        DeliveryReconciler::new(
            store,
            collector,
            config,
            HostIdentity {
                host_name: "PC-01".into(),
                host_address: "10.0.0.20".into(),
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn happy_path_marks_whole_batch_sent() {
        let store = Arc::new(MemoryJobStore::new());
        for n in 0..3 {
            store.enqueue(&job(n)).unwrap();
        }
        let collector = StubCollector::answering(200);
        let rec = reconciler(Arc::clone(&store), Arc::clone(&collector), configured());

        let report = rec.reconcile().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Delivered { count: 3 });
        assert_eq!(store.sent_count().unwrap(), 3);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn server_error_leaves_batch_for_verbatim_retry() {
        let store = Arc::new(MemoryJobStore::new());
        for n in 0..5 {
            store.enqueue(&job(n)).unwrap();
        }
        let collector = StubCollector::answering(500);
        let rec = reconciler(Arc::clone(&store), Arc::clone(&collector), configured());

        assert_eq!(
            rec.reconcile().await.unwrap().outcome,
            DeliveryOutcome::Failed { count: 5 }
        );
        assert_eq!(store.sent_count().unwrap(), 0);

        rec.reconcile().await.unwrap();
        let batches = collector.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], batches[1]);
        assert!(batches[0].windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn placeholder_endpoint_makes_no_calls() {
        let store = Arc::new(MemoryJobStore::new());
        store.enqueue(&job(1)).unwrap();
        let collector = StubCollector::answering(200);
        let config = AgentConfig {
            api_base_url: "https://tu-app.vercel.app".into(),
            ..configured()
        };
        let rec = reconciler(Arc::clone(&store), Arc::clone(&collector), config);

        let report = rec.reconcile().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::NotConfigured);
        assert!(!rec.send_heartbeat().await);
        assert_eq!(collector.calls(), 0);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn batches_are_bounded_and_oldest_first() {
        let store = Arc::new(MemoryJobStore::new());
        for n in 0..120 {
            store.enqueue(&job(n)).unwrap();
        }
        let collector = StubCollector::answering(200);
        let rec = reconciler(Arc::clone(&store), Arc::clone(&collector), configured());

        rec.reconcile().await.unwrap();
        rec.reconcile().await.unwrap();
        let batches = collector.batches.lock().unwrap().clone();
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[0][0], QueueId(1));
        assert_eq!(batches[1][0], QueueId(51));
        assert_eq!(store.pending_count().unwrap(), 20);
    }

    #[tokio::test]
    async fn pruning_runs_even_when_send_fails() {
        let store = Arc::new(MemoryJobStore::new());
        let old = store
            .enqueue_at(&job(0), Utc::now() - Duration::days(45))
            .unwrap();
        store.mark_sent(&[old]).unwrap();
        store.enqueue(&job(1)).unwrap();
        let rec = reconciler(Arc::clone(&store), StubCollector::answering(503), configured());

        let report = rec.reconcile().await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(store.sent_count().unwrap(), 0);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let store = Arc::new(MemoryJobStore::new());
        let collector = StubCollector::answering(200);
        let rec = reconciler(store, Arc::clone(&collector), configured());
        assert_eq!(rec.reconcile().await.unwrap().outcome, DeliveryOutcome::Idle);
        assert!(rec.send_heartbeat().await);
        assert!(collector.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_error() {
        let store = Arc::new(MemoryJobStore::new());
        store.set_unavailable(true);
        let rec = reconciler(Arc::clone(&store), StubCollector::answering(200), configured());
        assert!(matches!(rec.reconcile().await, Err(AgentError::Database(_))));
    }

    #[tokio::test]
    async fn oversized_retention_keeps_cycle_alive() {
        let store = Arc::new(MemoryJobStore::new());
        let old = store
            .enqueue_at(&job(0), Utc::now() - Duration::days(45))
            .unwrap();
        store.mark_sent(&[old]).unwrap();
        let config = AgentConfig {
            retention_days: u32::MAX,
            ..configured()
        };
        let rec = reconciler(Arc::clone(&store), StubCollector::answering(200), config);

        let report = rec.reconcile().await.unwrap();
        assert_eq!(report.pruned, 0);
        assert_eq!(store.sent_count().unwrap(), 1);
    }
}
