// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw print-completion event → `PrintJobRecord`.
//
// Fields are addressed positionally through a `FieldLayout`.  Anything that
// cannot be read falls back to a default; only a vector shorter than the
// layout's minimum is rejected outright.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use printaudit_core::config::FieldLayout;
use printaudit_core::error::{AgentError, Result};
use printaudit_core::types::{
    HostIdentity, JobStatus, PrintJobRecord, RawPrintEvent, UNKNOWN_PRINTER,
    sanitize_document_name,
};

use crate::connection::PrinterConnectionResolver;

pub struct JobNormalizer {
    layout: FieldLayout,
    host: HostIdentity,
    /// Used when the event carries no submitting user.
    fallback_user: String,
    connections: Arc<PrinterConnectionResolver>,
}

/// Values read from the property vector before enrichment.
#[derive(Debug)]
struct ParsedFields {
    job_id: Option<String>,
    document_name: String,
    user: Option<String>,
    printer_name: String,
    copies: u32,
    pages: u32,
}

impl JobNormalizer {
    pub fn new(
        layout: FieldLayout,
        host: HostIdentity,
        fallback_user: String,
        connections: Arc<PrinterConnectionResolver>,
    ) -> Self {
        Self {
            layout,
            host,
            fallback_user,
            connections,
        }
    }

    /// Build a job record, or `None` if the event cannot describe one.
    pub async fn normalize(&self, event: &RawPrintEvent) -> Option<PrintJobRecord> {
        let fields = match self.parse(event) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(record_id = ?event.record_id, error = %e, "print event rejected");
                return None;
            }
        };

        let printer_connection = self.connections.resolve(&fields.printer_name).await;
        debug!(
            record_id = ?event.record_id,
            printer = %fields.printer_name,
            connection = ?printer_connection,
            "print event normalized"
        );

        Some(PrintJobRecord {
            timestamp: event.time_created.unwrap_or_else(Utc::now),
            host_name: self.host.host_name.clone(),
            host_address: self.host.host_address.clone(),
            os_username: fields.user.unwrap_or_else(|| self.fallback_user.clone()),
            printer_name: fields.printer_name,
            printer_connection,
            job_id: fields.job_id,
            document_name: fields.document_name,
            pages_printed: fields.pages,
            copies: fields.copies,
            duplex: None,
            color: None,
            status: JobStatus::Completed,
        })
    }

    fn parse(&self, event: &RawPrintEvent) -> Result<ParsedFields> {
        let props = &event.properties;
        let layout = &self.layout;
        if props.len() < layout.min_fields {
            return Err(AgentError::MalformedEvent(format!(
                "{} properties, layout needs at least {}",
                props.len(),
                layout.min_fields
            )));
        }

        let field = |idx: usize| props.get(idx).map(|v| v.trim()).filter(|v| !v.is_empty());

        let pages_raw = props.get(layout.pages).or_else(|| props.get(layout.copies));

        Ok(ParsedFields {
            job_id: field(layout.job_id).map(str::to_string),
            document_name: sanitize_document_name(props.get(layout.document_name).map(String::as_str)),
            user: field(layout.user_name).map(str::to_string),
            printer_name: field(layout.printer_name)
                .unwrap_or(UNKNOWN_PRINTER)
                .to_string(),
            copies: parse_count(props.get(layout.copies)).max(1),
            pages: parse_count(pages_raw),
        })
    }
}

/// Non-negative count, 1 when absent or unreadable.
fn parse_count(value: Option<&String>) -> u32 {
    value.and_then(|v| v.trim().parse::<u32>().ok()).unwrap_or(1)
}
