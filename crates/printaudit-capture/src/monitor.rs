// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print event monitor — replays recent history, then follows the live log.
//
// Live events arrive on an inbound channel drained by one consumer task.
// Replay and live capture share one `ProcessedEvents` set, so an event seen
// by both is captured once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use printaudit_core::config::AgentConfig;
use printaudit_core::error::{AgentError, Result};
use printaudit_core::store::JobStore;
use printaudit_core::types::{QueueId, RawPrintEvent};

use crate::event_log::PrintEventLog;
use crate::normalizer::JobNormalizer;

/// Record ids already turned into a job (or deliberately skipped) during
/// this process lifetime.
#[derive(Debug, Default)]
pub struct ProcessedEvents {
    seen: Mutex<HashSet<u64>>,
}

impl ProcessedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time `record_id` is offered, `false` afterwards.
    /// Events without an id are always new.
    pub fn try_mark_processed(&self, record_id: Option<u64>) -> bool {
        match record_id {
            Some(id) => self
                .seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id),
            None => true,
        }
    }

    /// Let a later sighting of `record_id` be processed again.  Only a
    /// replay can offer it again; the live watch has already moved past it.
    fn forget(&self, record_id: Option<u64>) {
        if let Some(id) = record_id {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tunables for replay and the live channel.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub replay_lookback: chrono::Duration,
    pub replay_max_events: usize,
    pub channel_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            replay_lookback: chrono::Duration::minutes(30),
            replay_max_events: 300,
            channel_capacity: 256,
        }
    }
}

impl From<&AgentConfig> for MonitorSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            replay_lookback: cfg.replay_lookback(),
            replay_max_events: cfg.replay_max_events,
            ..Self::default()
        }
    }
}

/// Dedup → normalize → enqueue, shared by replay and the live consumer.
struct CapturePipeline {
    normalizer: Arc<JobNormalizer>,
    store: Arc<dyn JobStore>,
    processed: Arc<ProcessedEvents>,
}

impl CapturePipeline {
    async fn capture(&self, event: RawPrintEvent) -> Option<QueueId> {
        if !self.processed.try_mark_processed(event.record_id) {
            debug!(record_id = ?event.record_id, "duplicate print event ignored");
            return None;
        }

        let job = self.normalizer.normalize(&event).await?;

        let store = Arc::clone(&self.store);
        let document = job.document_name.clone();
        let pages = job.pages_printed;
        let result = tokio::task::spawn_blocking(move || store.enqueue(&job))
            .await
            .map_err(|e| AgentError::Database(format!("enqueue task failed: {e}")))
            .and_then(|r| r);

        match result {
            Ok(id) => {
                info!(queue_id = %id, %document, pages, "print job captured");
                Some(id)
            }
            Err(e) => {
                // Released so a replay of the same window can try again.
                error!(record_id = ?event.record_id, error = %e, class = ?e.class(), "failed to queue print job");
                self.processed.forget(event.record_id);
                None
            }
        }
    }
}

struct Running {
    cancel: CancellationToken,
    consumer: JoinHandle<()>,
}

/// Event source adapter.  Runs at most once per instance.
pub struct PrintEventMonitor {
    log: Arc<dyn PrintEventLog>,
    pipeline: Arc<CapturePipeline>,
    settings: MonitorSettings,
    started: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl PrintEventMonitor {
    pub fn new(
        log: Arc<dyn PrintEventLog>,
        normalizer: Arc<JobNormalizer>,
        store: Arc<dyn JobStore>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            log,
            pipeline: Arc::new(CapturePipeline {
                normalizer,
                store,
                processed: Arc::new(ProcessedEvents::new()),
            }),
            settings,
            started: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    pub fn processed(&self) -> &ProcessedEvents {
        &self.pipeline.processed
    }

    /// Replay the recent backlog, then follow live events.
    ///
    /// Replay problems are logged and do not prevent live capture.  Fails
    /// only if the live watch cannot be established or the monitor was
    /// already started once.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentError::EventLog("monitor already started".into()));
        }

        let replayed = self.replay_backlog().await;
        info!(replayed, "backlog replay finished");

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<RawPrintEvent>(self.settings.channel_capacity.max(1));

        let pipeline = Arc::clone(&self.pipeline);
        let consumer_cancel = cancel.clone();
        let consumer = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = consumer_cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                pipeline.capture(event).await;
            }
            debug!("live event consumer stopped");
        });

        if let Err(e) = self.log.watch(tx, cancel.clone()) {
            cancel.cancel();
            consumer.abort();
            return Err(e);
        }

        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running { cancel, consumer });
        info!("print event monitor running");
        Ok(())
    }

    /// Read the bounded recent history and capture what was missed.
    ///
    /// Returns the number of jobs queued.
    pub async fn replay_backlog(&self) -> usize {
        let since = Utc::now() - self.settings.replay_lookback;
        let mut events = match self
            .log
            .read_recent(since, self.settings.replay_max_events)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "backlog replay failed; continuing with live capture");
                return 0;
            }
        };
        events.truncate(self.settings.replay_max_events);

        // The log yields newest first; queue in print order.
        let mut captured = 0;
        for event in events.into_iter().rev() {
            if self.pipeline.capture(event).await.is_some() {
                captured += 1;
            }
        }
        captured
    }

    /// Stop the live watch.  Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().unwrap_or_else(PoisonError::into_inner).take() {
            running.cancel.cancel();
            // The consumer finishes the event in hand and exits on its own.
            drop(running.consumer);
            info!("print event monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.cancel.is_cancelled())
    }
}

impl Drop for PrintEventMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{PrinterConnectionResolver, PrinterPortLookup};
    use async_trait::async_trait;
    use chrono::DateTime;
    use printaudit_core::config::FieldLayout;
    use printaudit_core::types::HostIdentity;
    use printaudit_delivery::MemoryJobStore;
    use std::time::Duration;

    /// Event log double: fixed backlog, live events pushed by the test.
    #[derive(Default)]
    struct ScriptedLog {
        backlog: Vec<RawPrintEvent>,
        fail_backlog: bool,
        sink: Mutex<Option<mpsc::Sender<RawPrintEvent>>>,
    }

    impl ScriptedLog {
        async fn emit(&self, event: RawPrintEvent) {
            let sink = self.sink.lock().unwrap().clone().expect("watching");
            sink.send(event).await.expect("send");
        }
    }

    #[async_trait]
    impl PrintEventLog for ScriptedLog {
        async fn read_recent(
            &self,
            _since: DateTime<Utc>,
            max_events: usize,
        ) -> Result<Vec<RawPrintEvent>> {
            if self.fail_backlog {
                return Err(AgentError::EventLog("channel not found".into()));
            }
            Ok(self.backlog.iter().take(max_events).cloned().collect())
        }

        fn watch(&self, sink: mpsc::Sender<RawPrintEvent>, _cancel: CancellationToken) -> Result<()> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }
    }

    struct NoPorts;

    #[async_trait]
    impl PrinterPortLookup for NoPorts {
        async fn port_for(&self, _printer_name: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn raw(id: u64) -> RawPrintEvent {
        RawPrintEvent {
            record_id: Some(id),
            time_created: Some(Utc::now()),
            properties: vec![
                id.to_string(),
                format!("doc-{id}"),
                "ana".into(),
                String::new(),
                String::new(),
                "HP".into(),
                "1".into(),
                "2".into(),
            ],
        }
    }

    fn normalizer() -> Arc<JobNormalizer> {
        Arc::new(JobNormalizer::new(
            FieldLayout::default(),
            HostIdentity {
                host_name: "PC".into(),
                host_address: "10.0.0.1".into(),
            },
            "svc".into(),
            Arc::new(PrinterConnectionResolver::new(Arc::new(NoPorts))),
        ))
    }

    fn monitor(log: Arc<ScriptedLog>, store: Arc<MemoryJobStore>) -> PrintEventMonitor {
        PrintEventMonitor::new(log, normalizer(), store, MonitorSettings::default())
    }

    async fn wait_for_rows(store: &MemoryJobStore, expected: usize) {
        for _ in 0..200 {
            if store.all().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Give a stray duplicate time to show up.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn oversized_lookback_is_capped() {
        let cfg = AgentConfig {
            replay_lookback_mins: 1_000_000_000_000_000,
            ..AgentConfig::default()
        };
        let settings = MonitorSettings::from(&cfg);
        assert_eq!(
            settings.replay_lookback,
            chrono::Duration::minutes(printaudit_core::config::MAX_REPLAY_LOOKBACK_MINS as i64)
        );
    }

    #[test]
    fn dedup_accepts_each_id_once() {
        let processed = ProcessedEvents::new();
        assert!(processed.try_mark_processed(Some(7)));
        assert!(!processed.try_mark_processed(Some(7)));
        assert!(!processed.try_mark_processed(Some(7)));
        assert!(processed.try_mark_processed(Some(8)));
        assert_eq!(processed.len(), 2);
    }

    #[test]
    fn events_without_id_are_never_deduplicated() {
        let processed = ProcessedEvents::new();
        assert!(processed.try_mark_processed(None));
        assert!(processed.try_mark_processed(None));
        assert!(processed.is_empty());
    }

    #[tokio::test]
    async fn replay_and_live_overlap_yields_one_job() {
        let log = Arc::new(ScriptedLog {
            backlog: vec![raw(42), raw(41)],
            ..Default::default()
        });
        let store = Arc::new(MemoryJobStore::new());
        let monitor = monitor(Arc::clone(&log), Arc::clone(&store));

        monitor.start().await.expect("start");
        log.emit(raw(42)).await;
        log.emit(raw(43)).await;
        wait_for_rows(&store, 3).await;

        let rows = store.all();
        let ids: Vec<_> = rows.iter().filter_map(|r| r.job.job_id.clone()).collect();
        assert_eq!(ids, vec!["41", "42", "43"]);
        monitor.stop();
    }

    #[tokio::test]
    async fn replay_failure_still_starts_live_capture() {
        let log = Arc::new(ScriptedLog {
            fail_backlog: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryJobStore::new());
        let monitor = monitor(Arc::clone(&log), Arc::clone(&store));

        monitor.start().await.expect("start");
        assert!(monitor.is_running());
        log.emit(raw(5)).await;
        wait_for_rows(&store, 1).await;
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn replay_respects_max_events() {
        let log = Arc::new(ScriptedLog {
            backlog: (1..=10).rev().map(raw).collect(),
            ..Default::default()
        });
        let store = Arc::new(MemoryJobStore::new());
        let settings = MonitorSettings {
            replay_max_events: 4,
            ..MonitorSettings::default()
        };
        let bounded = PrintEventMonitor::new(log, normalizer(), store.clone(), settings);

        assert_eq!(bounded.replay_backlog().await, 4);
        let ids: Vec<_> = store.all().iter().filter_map(|r| r.job.job_id.clone()).collect();
        assert_eq!(ids, vec!["7", "8", "9", "10"]);
    }

    #[tokio::test]
    async fn malformed_event_does_not_stop_subscription() {
        let log = Arc::new(ScriptedLog::default());
        let store = Arc::new(MemoryJobStore::new());
        let monitor = monitor(Arc::clone(&log), Arc::clone(&store));
        monitor.start().await.expect("start");

        log.emit(RawPrintEvent {
            record_id: Some(1),
            time_created: None,
            properties: vec!["only".into()],
        })
        .await;
        log.emit(raw(2)).await;
        wait_for_rows(&store, 1).await;
        assert_eq!(store.all().len(), 1);
        assert!(monitor.is_running());
    }

    #[tokio::test]
    async fn storage_fault_releases_event_for_retry() {
        let log = Arc::new(ScriptedLog {
            backlog: vec![raw(9)],
            ..Default::default()
        });
        let store = Arc::new(MemoryJobStore::new());
        let monitor = monitor(Arc::clone(&log), Arc::clone(&store));

        store.set_unavailable(true);
        assert_eq!(monitor.replay_backlog().await, 0);
        store.set_unavailable(false);
        assert_eq!(monitor.replay_backlog().await, 1);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_start_runs_once() {
        let log = Arc::new(ScriptedLog::default());
        let store = Arc::new(MemoryJobStore::new());
        let monitor = monitor(log, store);

        monitor.stop();
        monitor.start().await.expect("start");
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(monitor.start().await.is_err());
    }
}
