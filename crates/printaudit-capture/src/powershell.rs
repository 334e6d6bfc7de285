// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Thin async wrapper for running PowerShell scripts.
//
// Inputs travel as environment variables, never spliced into the script
// text, so printer names and timestamps cannot alter the command.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Upper bound for a single script run.
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `script` with the given environment and return its stdout.
    ///
    /// A non-zero exit, a spawn failure or a timeout is reported as `Err`
    /// with a readable reason.
    pub async fn run(&self, script: &str, env: &[(&str, String)]) -> Result<String, String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command", script])
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(SCRIPT_TIMEOUT, cmd.output())
            .await
            .map_err(|_| format!("{} timed out after {SCRIPT_TIMEOUT:?}", self.program))?
            .map_err(|e| format!("spawn {}: {e}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} exited with {}: {}", self.program, output.status, stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = stdout.len(), "powershell script finished");
        Ok(stdout)
    }
}
