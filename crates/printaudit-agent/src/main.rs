// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintAudit Agent — headless print auditing for Windows hosts.
//
// Entry point. Initialises logging, then either hands the process to the
// Windows Service Control Manager (`--service`) or runs in the console
// until Ctrl-C or SIGTERM.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use printaudit_agent::logging;
use printaudit_agent::service::run_agent;
use printaudit_agent::services::data_dir;

fn main() -> ExitCode {
    let _log_guard = logging::init(&data_dir::data_subdir("logs"));

    #[cfg(windows)]
    if std::env::args().skip(1).any(|arg| arg == "--service") {
        return printaudit_agent::service::windows::run_dispatcher();
    }

    run_console()
}

fn run_console() -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "tokio runtime could not be started");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let outcome = runtime.block_on(async {
        tokio::spawn(shutdown_signal(cancel.clone()));
        run_agent(data_dir::data_dir(), cancel, || {}).await
    });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "agent stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// Cancel `cancel` on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown requested");
    cancel.cancel();
}
