// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::path::PathBuf;

/// Environment variable overriding the data directory.
pub const ENV_DATA_DIR: &str = "PRINTAUDIT_DATA_DIR";

/// Return the agent data directory, creating it if needed.
///
/// Holds `queue.db`, `config.json` and `logs/`.
pub fn data_dir() -> PathBuf {
    let dir = resolve(|key| std::env::var(key).ok(), cfg!(windows));
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Return a subdirectory inside the data dir (e.g. "logs").
pub fn data_subdir(name: &str) -> PathBuf {
    let dir = data_dir().join(name);
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn resolve(lookup: impl Fn(&str) -> Option<String>, windows: bool) -> PathBuf {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }

    if windows {
        let base = var("ProgramData").unwrap_or_else(|| r"C:\ProgramData".into());
        return PathBuf::from(base).join("PrintAudit");
    }

    // Try XDG data dir, then fallback to home
    if let Some(xdg) = var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("printaudit");
    }
    if let Some(home) = var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("printaudit");
    }
    // Last resort
    std::env::temp_dir().join("printaudit")
}
