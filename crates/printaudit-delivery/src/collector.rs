// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client for the remote collector.
//
// Two calls, both authenticated with the agent's bearer token:
//   - POST {base}/api/print-jobs       body { jobs: [...] }
//   - POST {base}/api/agents/heartbeat body { pcName, pcIp }
// Any non-2xx answer is a whole-request failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use printaudit_core::config::CollectorEndpoint;
use printaudit_core::error::{AgentError, Result};
use printaudit_core::types::{HostIdentity, QueuedJobRecord};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// What the collector reported for an accepted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub success: bool,
    /// Number of jobs the collector stored, if it said so.
    #[serde(default)]
    pub count: Option<usize>,
}

/// Remote side of the delivery pipeline.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Deliver one batch. `Ok` only for a 2xx answer.
    async fn submit_jobs(
        &self,
        endpoint: &CollectorEndpoint,
        jobs: &[QueuedJobRecord],
    ) -> Result<SubmitReceipt>;

    /// Report that this host is alive.
    async fn heartbeat(&self, endpoint: &CollectorEndpoint, host: &HostIdentity) -> Result<()>;
}

#[derive(Serialize)]
struct JobsPayload<'a> {
    jobs: &'a [QueuedJobRecord],
}

/// `Collector` over HTTPS using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: Client,
}

impl HttpCollector {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("printaudit-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Transport(format!("build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        token: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("POST {url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(AgentError::CollectorStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Collector for HttpCollector {
    #[instrument(skip_all, fields(count = jobs.len()))]
    async fn submit_jobs(
        &self,
        endpoint: &CollectorEndpoint,
        jobs: &[QueuedJobRecord],
    ) -> Result<SubmitReceipt> {
        let response = self
            .post(&endpoint.jobs_url(), &endpoint.token, &JobsPayload { jobs })
            .await?;

        // The status code is the contract; an odd body only costs us the count.
        let receipt = match response.json::<SubmitReceipt>().await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(error = %e, "collector accepted batch but response body was unreadable");
                SubmitReceipt::default()
            }
        };
        debug!(accepted = ?receipt.count, "batch accepted by collector");
        Ok(receipt)
    }

    #[instrument(skip_all, fields(host = %host.host_name))]
    async fn heartbeat(&self, endpoint: &CollectorEndpoint, host: &HostIdentity) -> Result<()> {
        self.post(&endpoint.heartbeat_url(), &endpoint.token, host)
            .await?;
        debug!("heartbeat acknowledged");
        Ok(())
    }
}
