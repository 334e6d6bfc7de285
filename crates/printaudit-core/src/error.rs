// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the print audit agent.

use thiserror::Error;

/// Top-level error type for all agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    // -- Capture errors --
    #[error("event log read failed: {0}")]
    EventLog(String),

    #[error("printer configuration query failed: {0}")]
    PrinterQuery(String),

    #[error("malformed print event: {0}")]
    MalformedEvent(String),

    // -- Delivery errors --
    #[error("collector transport error: {0}")]
    Transport(String),

    #[error("collector rejected request with status {status}: {body}")]
    CollectorStatus { status: u16, body: String },

    #[error("collector not configured: {0}")]
    NotConfigured(String),

    #[error("operation cancelled")]
    Cancelled,

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Runtime --
    #[error("background task failed: {0}")]
    Task(String),
}

/// How a failure is handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Network trouble or a non-2xx answer; retried next cycle.
    Transient,
    /// Missing or placeholder endpoint/credential; operation skipped.
    Configuration,
    /// A single event could not be turned into a job; event dropped.
    Parse,
    /// The local store failed; that one capture or cycle step fails.
    Storage,
}

impl AgentError {
    /// Classify the error for logging and retry decisions.
    pub fn class(&self) -> FaultClass {
        match self {
            Self::Transport(_) | Self::CollectorStatus { .. } | Self::Cancelled => {
                FaultClass::Transient
            }
            Self::EventLog(_) | Self::PrinterQuery(_) | Self::Task(_) => FaultClass::Transient,
            Self::NotConfigured(_) | Self::Config(_) => FaultClass::Configuration,
            Self::MalformedEvent(_) | Self::Serialization(_) => FaultClass::Parse,
            Self::Database(_) | Self::Io(_) => FaultClass::Storage,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AgentError>;
