// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — opens the durable queue, resolves the host
// identity and wires the capture pipeline and delivery reconciler around it.
//
// Everything shared is `Arc`-wrapped so the event monitor's consumer task
// and the scheduling loop see the same store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use printaudit_capture::{
    HostIdentityResolver, JobNormalizer, MonitorSettings, PowerShell, PowerShellEventLog,
    PowerShellPortLookup, PrintEventMonitor, PrinterConnectionResolver,
};
use printaudit_core::config::{AgentConfig, FieldLayout};
use printaudit_core::error::Result;
use printaudit_core::store::JobStore;
use printaudit_core::types::HostIdentity;
use printaudit_delivery::{DeliveryReconciler, HttpCollector, MemoryJobStore, SqliteJobQueue};

use crate::scheduler::SchedulingLoop;

pub const CONFIG_FILE: &str = "config.json";
pub const QUEUE_FILE: &str = "queue.db";

/// Fully wired agent, ready to hand to a `SchedulingLoop`.
pub struct AgentServices {
    config: AgentConfig,
    data_dir: PathBuf,
    host: HostIdentity,
    store: Arc<dyn JobStore>,
    monitor: Arc<PrintEventMonitor>,
    reconciler: Arc<DeliveryReconciler>,
    cancel: CancellationToken,
}

impl AgentServices {
    /// Initialise all services against the data directory.
    ///
    /// Loads (or writes a template for) `config.json` and opens `queue.db`.
    pub fn init(data_dir: PathBuf, cancel: CancellationToken) -> Result<Self> {
        info!(path = %data_dir.display(), "initialising agent services");

        let config = load_config(&data_dir);
        if !data_dir.join(CONFIG_FILE).exists()
            && let Err(e) = persist_config(&data_dir, &config)
        {
            warn!(error = %e, "could not write configuration template");
        }

        let queue = SqliteJobQueue::open(data_dir.join(QUEUE_FILE))?;
        Self::build(data_dir, config, Arc::new(queue), cancel)
    }

    /// Same wiring over an in-memory queue, for when the file store is
    /// unusable.  Captured jobs survive only until the process exits.
    pub fn fallback(data_dir: PathBuf, cancel: CancellationToken) -> Result<Self> {
        let config = load_config(&data_dir);
        Self::build(data_dir, config, Arc::new(MemoryJobStore::new()), cancel)
    }

    fn build(
        data_dir: PathBuf,
        config: AgentConfig,
        store: Arc<dyn JobStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let resolver = HostIdentityResolver::resolve();
        let host = resolver.identity().clone();

        let layout = match config.field_layout.validate() {
            Ok(()) => config.field_layout.clone(),
            Err(e) => {
                error!(error = %e, "configured field layout rejected; using default");
                FieldLayout::default()
            }
        };

        let shell = PowerShell::new(config.powershell.clone());
        let connections = Arc::new(PrinterConnectionResolver::new(Arc::new(
            PowerShellPortLookup::new(shell.clone()),
        )));
        let normalizer = Arc::new(JobNormalizer::new(
            layout,
            host.clone(),
            resolver.current_username(),
            connections,
        ));
        let monitor = Arc::new(PrintEventMonitor::new(
            Arc::new(PowerShellEventLog::new(shell, &config)),
            normalizer,
            Arc::clone(&store),
            MonitorSettings::from(&config),
        ));

        let collector = Arc::new(HttpCollector::new(config.request_timeout())?);
        let reconciler = Arc::new(DeliveryReconciler::new(
            Arc::clone(&store),
            collector,
            config.clone(),
            host.clone(),
            cancel.child_token(),
        ));

        if let Err(e) = config.check_ranges() {
            warn!(error = %e, "configuration values out of range");
        }
        if let Err(e) = config.collector_endpoint() {
            warn!(reason = %e, "collector not configured; jobs will queue locally");
        }

        Ok(Self {
            config,
            data_dir,
            host,
            store,
            monitor,
            reconciler,
            cancel,
        })
    }

    /// The loop driving these services.
    pub fn scheduler(&self) -> SchedulingLoop {
        SchedulingLoop::new(
            Arc::clone(&self.monitor),
            Arc::clone(&self.reconciler),
            &self.config,
            self.cancel.clone(),
        )
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Path to the data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

// -- Config file persistence -------------------------------------------------

/// Read `config.json`, falling back to defaults, then apply environment
/// overrides.
pub fn load_config(data_dir: &Path) -> AgentConfig {
    let path = data_dir.join(CONFIG_FILE);
    let mut config = match std::fs::read_to_string(&path) {
        Ok(data) => match serde_json::from_str::<AgentConfig>(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed configuration; using defaults");
                AgentConfig::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no configuration file; using defaults");
            AgentConfig::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "configuration unreadable; using defaults");
            AgentConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}

pub fn persist_config(data_dir: &Path, config: &AgentConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}
