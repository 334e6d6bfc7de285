// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Access to the OS print-event log.
//
// Two capabilities: a bounded, newest-first read of recent completion events
// (used for the startup replay) and a live watch that pushes new events into
// a channel until cancelled.  The PowerShell implementation watches by
// polling for record ids past the last one forwarded, paging through any
// backlog oldest first.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printaudit_core::config::AgentConfig;
use printaudit_core::error::{AgentError, Result};
use printaudit_core::types::RawPrintEvent;

use crate::powershell::PowerShell;

/// Read-back window of the first live poll before a record id is known.
const POLL_OVERLAP_SECS: i64 = 60;

/// Page size of one poll; a full page is followed by an immediate re-poll.
const POLL_MAX_EVENTS: usize = 500;

/// Source of print-completion events.
#[async_trait]
pub trait PrintEventLog: Send + Sync {
    /// Completion events created at or after `since`, newest first, at most
    /// `max_events` of them.
    async fn read_recent(&self, since: DateTime<Utc>, max_events: usize)
    -> Result<Vec<RawPrintEvent>>;

    /// Start pushing newly written events into `sink` until `cancel` fires.
    ///
    /// Returns once the watch is established; delivery happens in the
    /// background.
    fn watch(&self, sink: mpsc::Sender<RawPrintEvent>, cancel: CancellationToken) -> Result<()>;
}

/// Reads newest first from a start time, or oldest first after a record id
/// when `PRINTAUDIT_AFTER` is set.
const READ_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$max = [int]$env:PRINTAUDIT_MAX
if ($env:PRINTAUDIT_AFTER) {
    $xpath = "*[System[EventID=$([int]$env:PRINTAUDIT_EVENT_ID) and EventRecordID>$([long]$env:PRINTAUDIT_AFTER)]]"
    $query = { Get-WinEvent -LogName $env:PRINTAUDIT_LOG -FilterXPath $xpath -MaxEvents $max -Oldest }
} else {
    $since = [datetime]::Parse($env:PRINTAUDIT_SINCE, [Globalization.CultureInfo]::InvariantCulture, [Globalization.DateTimeStyles]::RoundtripKind)
    $filter = @{ LogName = $env:PRINTAUDIT_LOG; Id = [int]$env:PRINTAUDIT_EVENT_ID; StartTime = $since.ToLocalTime() }
    $query = { Get-WinEvent -FilterHashtable $filter -MaxEvents $max }
}
try {
    $events = @(& $query)
} catch {
    if ($_.FullyQualifiedErrorId -like 'NoMatchingEventsFound*') { $events = @() } else { throw }
}
$rows = @($events | ForEach-Object {
    [pscustomobject]@{
        RecordId    = $_.RecordId
        TimeCreated = if ($_.TimeCreated) { $_.TimeCreated.ToUniversalTime().ToString('o') } else { $null }
        Properties  = @($_.Properties | ForEach-Object { if ($null -eq $_.Value) { '' } else { [string]$_.Value } })
    }
})
[Console]::Out.Write((ConvertTo-Json -InputObject $rows -Depth 4 -Compress))
"#;

/// `PrintEventLog` backed by `Get-WinEvent`.
#[derive(Debug, Clone)]
pub struct PowerShellEventLog {
    shell: PowerShell,
    channel: String,
    event_id: u32,
    poll_interval: Duration,
}

impl PowerShellEventLog {
    pub fn new(shell: PowerShell, config: &AgentConfig) -> Self {
        Self {
            shell,
            channel: config.event_log_channel.clone(),
            event_id: config.completion_event_id,
            poll_interval: config.poll_interval(),
        }
    }

    async fn poll_loop(self, sink: mpsc::Sender<RawPrintEvent>, cancel: CancellationToken) {
        let mut cursor = PollCursor::default();
        let started = Utc::now();
        let mut catching_up = false;

        loop {
            if !catching_up {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            } else if cancel.is_cancelled() {
                break;
            }

            let page = match cursor.high_water {
                Some(after) => self.read_after(after, POLL_MAX_EVENTS).await,
                None => {
                    let since = started - chrono::Duration::seconds(POLL_OVERLAP_SECS);
                    self.read_recent(since, POLL_MAX_EVENTS).await.map(|mut events| {
                        events.reverse();
                        events
                    })
                }
            };
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "event log poll failed");
                    catching_up = false;
                    continue;
                }
            };

            // A full page means more events are waiting past it.
            catching_up = page.len() >= POLL_MAX_EVENTS;
            if catching_up {
                debug!(count = page.len(), "event log backlog; polling again at once");
            }

            for event in cursor.admit(page) {
                if sink.send(event).await.is_err() {
                    debug!("event sink closed; stopping watch");
                    return;
                }
            }
        }
        debug!("event log watch cancelled");
    }

    /// Completion events with a record id above `after`, oldest first.
    async fn read_after(&self, after: u64, max_events: usize) -> Result<Vec<RawPrintEvent>> {
        let mut env = self.base_env(max_events);
        env.push(("PRINTAUDIT_AFTER", after.to_string()));
        self.query(&env, max_events).await
    }

    fn base_env(&self, max_events: usize) -> Vec<(&'static str, String)> {
        vec![
            ("PRINTAUDIT_LOG", self.channel.clone()),
            ("PRINTAUDIT_EVENT_ID", self.event_id.to_string()),
            ("PRINTAUDIT_MAX", max_events.to_string()),
        ]
    }

    async fn query(&self, env: &[(&str, String)], max_events: usize) -> Result<Vec<RawPrintEvent>> {
        let stdout = self
            .shell
            .run(READ_SCRIPT, env)
            .await
            .map_err(AgentError::EventLog)?;
        let mut events = parse_events(&stdout)?;
        events.truncate(max_events);
        Ok(events)
    }
}

/// Position of the live watch in the event log.
#[derive(Debug, Default)]
struct PollCursor {
    high_water: Option<u64>,
}

impl PollCursor {
    /// Keep the events of an oldest-first page that lie past the high-water
    /// mark, and advance the mark over them.
    fn admit(&mut self, page: Vec<RawPrintEvent>) -> Vec<RawPrintEvent> {
        let mut admitted = Vec::with_capacity(page.len());
        for event in page {
            if let (Some(id), Some(seen)) = (event.record_id, self.high_water)
                && id <= seen
            {
                continue;
            }
            if let Some(id) = event.record_id {
                self.high_water = Some(self.high_water.map_or(id, |seen| seen.max(id)));
            }
            admitted.push(event);
        }
        admitted
    }
}

#[async_trait]
impl PrintEventLog for PowerShellEventLog {
    async fn read_recent(
        &self,
        since: DateTime<Utc>,
        max_events: usize,
    ) -> Result<Vec<RawPrintEvent>> {
        if max_events == 0 {
            return Ok(Vec::new());
        }
        let mut env = self.base_env(max_events);
        env.push(("PRINTAUDIT_SINCE", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
        self.query(&env, max_events).await
    }

    fn watch(&self, sink: mpsc::Sender<RawPrintEvent>, cancel: CancellationToken) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AgentError::EventLog(format!("no async runtime for watch: {e}")))?;
        handle.spawn(self.clone().poll_loop(sink, cancel));
        info!(channel = %self.channel, event_id = self.event_id, "event log watch started");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EventRow {
    record_id: Option<u64>,
    time_created: Option<String>,
    #[serde(default)]
    properties: Vec<serde_json::Value>,
}

/// Decode the JSON array emitted by `READ_SCRIPT`.
pub(crate) fn parse_events(stdout: &str) -> Result<Vec<RawPrintEvent>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<EventRow> = serde_json::from_str(trimmed)
        .map_err(|e| AgentError::EventLog(format!("unreadable event JSON: {e}")))?;

    Ok(rows
        .into_iter()
        .map(|row| RawPrintEvent {
            record_id: row.record_id,
            time_created: row
                .time_created
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            properties: row.properties.into_iter().map(value_to_string).collect(),
        })
        .collect())
}

fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_powershell_rows() {
        let json = r#"[
            {"RecordId":42,"TimeCreated":"2026-03-01T14:05:09.1234567Z",
             "Properties":["12","Quarterly.xlsx","ana","\\\\PC-01","HP LaserJet","USB001",2,"3"]},
            {"RecordId":null,"TimeCreated":null,"Properties":[null]}
        ]"#;
        let events = parse_events(json).expect("parse");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].record_id, Some(42));
        assert_eq!(events[0].properties[1], "Quarterly.xlsx");
        assert_eq!(events[0].properties[6], "2");
        assert_eq!(
            events[0].time_created.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Some("2026-03-01T14:05:09Z".to_string())
        );
        assert_eq!(events[1].record_id, None);
        assert_eq!(events[1].properties, vec![String::new()]);
    }

    fn event(id: u64) -> RawPrintEvent {
        RawPrintEvent {
            record_id: Some(id),
            ..Default::default()
        }
    }

    fn ids(events: &[RawPrintEvent]) -> Vec<u64> {
        events.iter().filter_map(|e| e.record_id).collect()
    }

    #[test]
    fn cursor_admits_only_events_past_high_water() {
        let mut cursor = PollCursor::default();
        assert_eq!(ids(&cursor.admit(vec![event(10), event(11), event(12)])), vec![10, 11, 12]);
        assert_eq!(cursor.high_water, Some(12));

        // Overlapping page: already forwarded ids are dropped.
        assert_eq!(ids(&cursor.admit(vec![event(11), event(12), event(13)])), vec![13]);
        assert_eq!(cursor.high_water, Some(13));
    }

    #[test]
    fn cursor_pages_through_backlog_without_loss() {
        // 1200 events waiting, fetched in oldest-first pages after the mark.
        let backlog: Vec<u64> = (1..=1200).collect();
        let mut cursor = PollCursor {
            high_water: Some(0),
        };
        let mut forwarded = Vec::new();
        loop {
            let after = cursor.high_water.unwrap_or(0);
            let page: Vec<_> = backlog
                .iter()
                .filter(|&&id| id > after)
                .take(POLL_MAX_EVENTS)
                .map(|&id| event(id))
                .collect();
            let full = page.len() >= POLL_MAX_EVENTS;
            forwarded.extend(ids(&cursor.admit(page)));
            if !full {
                break;
            }
        }
        assert_eq!(forwarded, backlog);
    }

    #[test]
    fn cursor_passes_events_without_id() {
        let mut cursor = PollCursor {
            high_water: Some(5),
        };
        let admitted = cursor.admit(vec![RawPrintEvent::default(), event(3)]);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].record_id, None);
    }

    #[test]
    fn empty_output_means_no_events() {
        assert!(parse_events("").expect("parse").is_empty());
        assert!(parse_events("[]").expect("parse").is_empty());
    }

    #[test]
    fn garbage_output_is_event_log_error() {
        assert!(matches!(parse_events("Access is denied."), Err(AgentError::EventLog(_))));
    }
}
