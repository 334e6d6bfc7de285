// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for captured print jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for missing document names.
pub const NOT_AVAILABLE: &str = "N/D";

/// Maximum stored length of a document name, in characters.
pub const MAX_DOCUMENT_NAME_CHARS: usize = 255;

/// Placeholder for a blank printer name.
pub const UNKNOWN_PRINTER: &str = "Unknown";

/// Local primary key of a queued job.
///
/// Assigned by the store on insert, monotonically increasing and stable
/// across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(pub i64);

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status reported to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A completed print job as captured on this host.
///
/// Serialized with the collector's camelCase field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJobRecord {
    /// When the OS reports the job completed.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "pcName")]
    pub host_name: String,
    #[serde(rename = "pcIp")]
    pub host_address: String,
    #[serde(rename = "usernameWindows")]
    pub os_username: String,
    pub printer_name: String,
    /// USB port token or IP literal, when it could be resolved.
    pub printer_connection: Option<String>,
    pub job_id: Option<String>,
    pub document_name: String,
    pub pages_printed: u32,
    pub copies: u32,
    pub duplex: Option<bool>,
    pub color: Option<bool>,
    pub status: JobStatus,
}

/// A `PrintJobRecord` as persisted in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJobRecord {
    pub id: QueueId,
    #[serde(flatten)]
    pub job: PrintJobRecord,
    /// Never leaves the host.
    #[serde(skip)]
    pub sent: bool,
    /// Local persistence time, used for pruning.
    #[serde(skip, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Raw print-completion event as delivered by the OS event log.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPrintEvent {
    /// Monotonic per-record identifier, if the log supplied one.
    pub record_id: Option<u64>,
    pub time_created: Option<DateTime<Utc>>,
    /// Positional property vector, stringified.
    pub properties: Vec<String>,
}

/// Identity of the machine this agent runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostIdentity {
    #[serde(rename = "pcName")]
    pub host_name: String,
    #[serde(rename = "pcIp")]
    pub host_address: String,
}

/// Clean a document name: blank becomes `N/D`, long names are cut to
/// `MAX_DOCUMENT_NAME_CHARS` characters.
pub fn sanitize_document_name(name: Option<&str>) -> String {
    match name {
        Some(n) if !n.trim().is_empty() => n.chars().take(MAX_DOCUMENT_NAME_CHARS).collect(),
        _ => NOT_AVAILABLE.to_string(),
    }
}
