// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Hosts shipped in installer templates; an endpoint still pointing at one of
/// these was never configured.
const PLACEHOLDER_HOSTS: &[&str] = &["your-vercel-app.vercel.app", "tu-app.vercel.app", "example.com"];

/// Longest backlog the startup replay reads, in minutes (one week).
pub const MAX_REPLAY_LOOKBACK_MINS: u64 = 7 * 24 * 60;

/// Longest retention of sent rows, in days (ten years).
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// Environment variable overriding `api_base_url`.
pub const ENV_API_BASE_URL: &str = "PRINTAUDIT_API_BASE_URL";

/// Environment variable overriding `agent_token`.
pub const ENV_AGENT_TOKEN: &str = "PRINTAUDIT_AGENT_TOKEN";

/// Persistent agent settings, stored as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Base URL of the collector, e.g. `https://audit.example.org`.
    pub api_base_url: String,
    /// Bearer credential issued to this agent.
    pub agent_token: String,
    /// Delay between delivery cycles.
    pub send_interval_secs: u64,
    /// Delay after a failed cycle.
    pub error_backoff_secs: u64,
    /// Maximum jobs per delivery request.
    pub batch_size: usize,
    /// Sent jobs older than this are pruned.
    pub retention_days: u32,
    /// How far back the startup replay reads.
    pub replay_lookback_mins: u64,
    /// Upper bound of events read by the startup replay.
    pub replay_max_events: usize,
    /// Delay between live event log polls.
    pub poll_interval_secs: u64,
    /// Timeout of a single collector request.
    pub request_timeout_secs: u64,
    /// Event log channel carrying print completions.
    pub event_log_channel: String,
    /// Event id of a completed print job.
    pub completion_event_id: u32,
    /// Positional mapping of the event's property vector.
    pub field_layout: FieldLayout,
    /// Program used to reach the event log and printer configuration.
    pub powershell: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            agent_token: String::new(),
            send_interval_secs: 300,
            error_backoff_secs: 60,
            batch_size: 50,
            retention_days: 30,
            replay_lookback_mins: 30,
            replay_max_events: 300,
            poll_interval_secs: 5,
            request_timeout_secs: 30,
            event_log_channel: "Microsoft-Windows-PrintService/Operational".into(),
            completion_event_id: 307,
            field_layout: FieldLayout::default(),
            powershell: if cfg!(windows) { "powershell.exe".into() } else { "pwsh".into() },
        }
    }
}

impl AgentConfig {
    /// Apply `PRINTAUDIT_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(token) = lookup(ENV_AGENT_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.agent_token = token;
        }
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Replay window, capped at `MAX_REPLAY_LOOKBACK_MINS`.
    pub fn replay_lookback(&self) -> chrono::Duration {
        let mins = self.replay_lookback_mins.min(MAX_REPLAY_LOOKBACK_MINS);
        chrono::Duration::minutes(mins as i64)
    }

    /// Retention of sent rows, capped at `MAX_RETENTION_DAYS`.
    pub fn retention(&self) -> u32 {
        self.retention_days.min(MAX_RETENTION_DAYS)
    }

    /// Report values that the accessors will cap.
    pub fn check_ranges(&self) -> Result<()> {
        let mut capped = Vec::new();
        if self.replay_lookback_mins > MAX_REPLAY_LOOKBACK_MINS {
            capped.push(format!(
                "replayLookbackMins {} capped at {MAX_REPLAY_LOOKBACK_MINS}",
                self.replay_lookback_mins
            ));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            capped.push(format!(
                "retentionDays {} capped at {MAX_RETENTION_DAYS}",
                self.retention_days
            ));
        }
        if capped.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Config(capped.join("; ")))
        }
    }

    /// Validated collector endpoint.
    ///
    /// Fails with `NotConfigured` when the base URL is blank or still a
    /// placeholder, or when the token is blank. No request may be made
    /// without a valid endpoint.
    pub fn collector_endpoint(&self) -> Result<CollectorEndpoint> {
        let base = self.api_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(AgentError::NotConfigured("apiBaseUrl is empty".into()));
        }
        let lower = base.to_ascii_lowercase();
        let Some(rest) = lower
            .strip_prefix("https://")
            .or_else(|| lower.strip_prefix("http://"))
        else {
            return Err(AgentError::NotConfigured(format!(
                "apiBaseUrl '{base}' is not an http(s) URL"
            )));
        };
        let host = url_host(rest);
        if host.is_empty() {
            return Err(AgentError::NotConfigured(format!("apiBaseUrl '{base}' has no host")));
        }
        if PLACEHOLDER_HOSTS
            .iter()
            .any(|p| host == *p || host.ends_with(&format!(".{p}")))
        {
            return Err(AgentError::NotConfigured(format!(
                "apiBaseUrl still points at placeholder '{base}'"
            )));
        }
        let token = self.agent_token.trim();
        if token.is_empty() {
            return Err(AgentError::NotConfigured("agentToken is empty".into()));
        }
        Ok(CollectorEndpoint {
            base_url: base.to_string(),
            token: token.to_string(),
        })
    }
}

/// Host part of a URL with its scheme already removed.
fn url_host(rest: &str) -> &str {
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    host_port.split(':').next().unwrap_or_default()
}

/// A collector base URL and credential that passed validation.
#[derive(Clone, PartialEq, Eq)]
pub struct CollectorEndpoint {
    pub base_url: String,
    pub token: String,
}

impl CollectorEndpoint {
    pub fn jobs_url(&self) -> String {
        format!("{}/api/print-jobs", self.base_url)
    }

    pub fn heartbeat_url(&self) -> String {
        format!("{}/api/agents/heartbeat", self.base_url)
    }
}

// The token stays out of logs.
impl std::fmt::Debug for CollectorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorEndpoint")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Positional mapping of a print-completion event's property vector.
///
/// The payload layout differs between OS builds, so the indices are data
/// rather than code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldLayout {
    /// Vectors shorter than this are rejected.
    pub min_fields: usize,
    pub job_id: usize,
    pub document_name: usize,
    pub user_name: usize,
    pub printer_name: usize,
    pub copies: usize,
    /// Falls back to `copies` when the vector has no such index.
    pub pages: usize,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            min_fields: 6,
            job_id: 0,
            document_name: 1,
            user_name: 2,
            printer_name: 5,
            copies: 6,
            pages: 7,
        }
    }
}

impl FieldLayout {
    /// Reject layouts whose required indices do not fit `min_fields`.
    pub fn validate(&self) -> Result<()> {
        let required = [self.job_id, self.document_name, self.user_name, self.printer_name];
        if let Some(idx) = required.iter().find(|&&i| i >= self.min_fields) {
            return Err(AgentError::Config(format!(
                "field index {idx} is outside minFields {}",
                self.min_fields
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AgentConfig {
        AgentConfig {
            api_base_url: "https://audit.internal.test/".into(),
            agent_token: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_service_cadence() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.send_interval(), Duration::from_secs(300));
        assert_eq!(cfg.error_backoff(), Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.replay_max_events, 300);
        assert_eq!(cfg.completion_event_id, 307);
    }

    #[test]
    fn empty_url_is_not_configured() {
        let err = AgentConfig::default().collector_endpoint().unwrap_err();
        assert!(matches!(err, AgentError::NotConfigured(_)));
    }

    #[test]
    fn placeholder_url_is_not_configured() {
        let cfg = AgentConfig {
            api_base_url: "https://your-vercel-app.vercel.app".into(),
            ..configured()
        };
        assert!(matches!(cfg.collector_endpoint(), Err(AgentError::NotConfigured(_))));
    }

    #[test]
    fn blank_token_is_not_configured() {
        let cfg = AgentConfig {
            agent_token: "  ".into(),
            ..configured()
        };
        assert!(matches!(cfg.collector_endpoint(), Err(AgentError::NotConfigured(_))));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let endpoint = configured().collector_endpoint().expect("valid");
        assert_eq!(endpoint.jobs_url(), "https://audit.internal.test/api/print-jobs");
        assert_eq!(
            endpoint.heartbeat_url(),
            "https://audit.internal.test/api/agents/heartbeat"
        );
        assert!(!format!("{endpoint:?}").contains("secret"));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = configured();
        cfg.apply_overrides(|key| match key {
            ENV_API_BASE_URL => Some("https://collector.lan".into()),
            ENV_AGENT_TOKEN => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.api_base_url, "https://collector.lan");
        assert_eq!(cfg.agent_token, "secret");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: AgentConfig =
            serde_json::from_str(r#"{ "apiBaseUrl": "https://c.lan", "batchSize": 10 }"#)
                .expect("parse");
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.field_layout, FieldLayout::default());
    }

    #[test]
    fn layout_validation_rejects_out_of_range_index() {
        let layout = FieldLayout {
            printer_name: 6,
            ..Default::default()
        };
        assert!(layout.validate().is_err());
        assert!(FieldLayout::default().validate().is_ok());
    }

    #[test]
    fn placeholder_match_is_by_host_not_substring() {
        for url in [
            "https://myexample.company.net",
            "https://example.community.org/api",
            "http://10.0.0.9:3000",
        ] {
            let cfg = AgentConfig {
                api_base_url: url.into(),
                ..configured()
            };
            assert!(cfg.collector_endpoint().is_ok(), "{url} should be accepted");
        }
        for url in [
            "https://example.com",
            "https://api.example.com/",
            "https://EXAMPLE.com:8443/x",
            "https://tu-app.vercel.app",
        ] {
            let cfg = AgentConfig {
                api_base_url: url.into(),
                ..configured()
            };
            assert!(
                matches!(cfg.collector_endpoint(), Err(AgentError::NotConfigured(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn url_without_host_is_not_configured() {
        let cfg = AgentConfig {
            api_base_url: "https:///api".into(),
            ..configured()
        };
        assert!(matches!(cfg.collector_endpoint(), Err(AgentError::NotConfigured(_))));
    }

    #[test]
    fn huge_windows_are_capped_not_fatal() {
        let cfg = AgentConfig {
            replay_lookback_mins: 1_000_000_000_000_000,
            retention_days: u32::MAX,
            ..AgentConfig::default()
        };
        assert_eq!(
            cfg.replay_lookback(),
            chrono::Duration::minutes(MAX_REPLAY_LOOKBACK_MINS as i64)
        );
        assert_eq!(cfg.retention(), MAX_RETENTION_DAYS);
        assert!(matches!(cfg.check_ranges(), Err(AgentError::Config(_))));
        assert!(AgentConfig::default().check_ranges().is_ok());
    }
}
