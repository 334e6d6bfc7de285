// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer name → physical connection (USB port token or IP literal).
//
// Lookups go to the OS printer configuration once per printer per process;
// both hits and misses are cached, keyed case-insensitively.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use printaudit_core::error::{AgentError, Result};

use crate::powershell::PowerShell;

/// Dotted-quad candidate embedded in a longer port string.
static DOTTED_QUAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:\.\d{1,3}){3}").expect("static regex")
});

/// Source of raw port strings for a printer.
#[async_trait]
pub trait PrinterPortLookup: Send + Sync {
    /// Port bound to exactly this printer name, `None` when no printer matches.
    async fn port_for(&self, printer_name: &str) -> Result<Option<String>>;
}

/// Queries `Win32_Printer.PortName` through CIM.
#[derive(Debug, Clone)]
pub struct PowerShellPortLookup {
    shell: PowerShell,
}

const PORT_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
$printer = Get-CimInstance -ClassName Win32_Printer -Filter $env:PRINTAUDIT_WQL_FILTER | Select-Object -First 1
if ($printer) { [Console]::Out.Write([string]$printer.PortName) }
"#;

impl PowerShellPortLookup {
    pub fn new(shell: PowerShell) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl PrinterPortLookup for PowerShellPortLookup {
    async fn port_for(&self, printer_name: &str) -> Result<Option<String>> {
        let filter = format!("Name = '{}'", escape_wql_literal(printer_name));
        let stdout = self
            .shell
            .run(PORT_SCRIPT, &[("PRINTAUDIT_WQL_FILTER", filter)])
            .await
            .map_err(AgentError::PrinterQuery)?;
        let port = stdout.trim();
        Ok((!port.is_empty()).then(|| port.to_string()))
    }
}

/// Escape a value for use inside a single-quoted WQL string literal.
pub fn escape_wql_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out
}

/// Reduce a raw port string to a connection identifier.
///
/// `USB…` ports are upper-cased, IPv4 literals are kept, an IPv4 address
/// embedded in a longer string is extracted, anything else is returned
/// trimmed.  Blank input yields `None`.
pub fn normalize_connection(raw: &str) -> Option<String> {
    let port = raw.trim();
    if port.is_empty() {
        return None;
    }
    if port.get(..3).is_some_and(|head| head.eq_ignore_ascii_case("usb")) {
        return Some(port.to_uppercase());
    }
    if port.parse::<Ipv4Addr>().is_ok() {
        return Some(port.to_string());
    }
    if let Some(ip) = DOTTED_QUAD
        .find_iter(port)
        .map(|m| m.as_str())
        .find(|candidate| candidate.parse::<Ipv4Addr>().is_ok())
    {
        return Some(ip.to_string());
    }
    Some(port.to_string())
}

/// Caching resolver shared by the replay and live capture paths.
pub struct PrinterConnectionResolver {
    lookup: Arc<dyn PrinterPortLookup>,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl PrinterConnectionResolver {
    pub fn new(lookup: Arc<dyn PrinterPortLookup>) -> Self {
        Self {
            lookup,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Connection for `printer_name`, or `None` if it cannot be resolved.
    ///
    /// Never fails; a failed lookup is cached as `None`.
    pub async fn resolve(&self, printer_name: &str) -> Option<String> {
        let name = printer_name.trim();
        if name.is_empty() {
            return None;
        }
        let key = name.to_lowercase();
        if let Some(cached) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return cached.clone();
        }

        let resolved = match self.lookup.port_for(name).await {
            Ok(Some(raw)) => normalize_connection(&raw),
            Ok(None) => {
                debug!(printer = %name, "no printer configuration matched");
                None
            }
            Err(e) => {
                warn!(printer = %name, error = %e, "printer connection lookup failed");
                None
            }
        };

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved.clone());
        resolved
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
