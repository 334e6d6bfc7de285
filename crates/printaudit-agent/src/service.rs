// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host process lifecycle.
//
// `run_agent` is the body shared by the console binary and the Windows
// service.  Under the Service Control Manager the agent reports
// StartPending → Running → StopPending → Stopped, and a Stop or Shutdown
// control cancels the same token Ctrl-C cancels in a console.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use printaudit_core::error::Result;

use crate::services::agent_services::AgentServices;

/// Name the service is registered under.
pub const SERVICE_NAME: &str = "PrintAuditAgent";

/// Start services from `dir` and run the scheduling loop until `cancel`
/// fires.  `on_ready` is called once the loop is about to start.
pub async fn run_agent(
    dir: PathBuf,
    cancel: CancellationToken,
    on_ready: impl FnOnce(),
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), data_dir = %dir.display(), "PrintAudit agent starting");

    let services = match AgentServices::init(dir.clone(), cancel.clone()) {
        Ok(s) => {
            info!("agent services initialised");
            s
        }
        Err(e) => {
            error!(error = %e, "persistent queue failed; using in-memory fallback");
            AgentServices::fallback(dir, cancel)?
        }
    };

    on_ready();
    services.scheduler().run().await?;

    info!("PrintAudit agent stopped");
    Ok(())
}

/// Lifecycle phases reported to the Service Control Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

impl ServicePhase {
    /// Only a running service takes stop requests.
    pub fn accepts_stop(self) -> bool {
        self == Self::Running
    }

    /// How long the SCM should wait before the next status report.
    pub fn wait_hint(self) -> Duration {
        match self {
            Self::StartPending => Duration::from_secs(10),
            // An in-flight delivery finishes before the loop exits.
            Self::StopPending => Duration::from_secs(60),
            Self::Running | Self::Stopped => Duration::ZERO,
        }
    }
}

/// Control requests the agent distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceControl {
    Stop,
    Shutdown,
    Interrogate,
    Other,
}

/// Apply a control request.  Returns `false` for controls the agent does
/// not implement.
pub fn handle_control(control: ServiceControl, cancel: &CancellationToken) -> bool {
    match control {
        ServiceControl::Stop | ServiceControl::Shutdown => {
            info!(?control, "stop requested by service control manager");
            cancel.cancel();
            true
        }
        ServiceControl::Interrogate => true,
        ServiceControl::Other => false,
    }
}

#[cfg(windows)]
pub mod windows {
    use std::ffi::OsString;
    use std::process::ExitCode;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use tracing::{error, warn};
    use windows_service::service::{
        self as scm, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
        ServiceType,
    };
    use windows_service::service_control_handler::{
        self, ServiceControlHandlerResult, ServiceStatusHandle,
    };
    use windows_service::{define_windows_service, service_dispatcher};

    use super::{SERVICE_NAME, ServiceControl, ServicePhase, handle_control, run_agent};
    use crate::services::data_dir;

    define_windows_service!(ffi_service_main, service_main);

    /// Hand the process to the Service Control Manager.  Blocks until the
    /// service has stopped.
    pub fn run_dispatcher() -> ExitCode {
        match service_dispatcher::start(SERVICE_NAME, ffi_service_main) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "service dispatcher failed; was the agent started by the SCM?");
                ExitCode::FAILURE
            }
        }
    }

    fn service_main(_arguments: Vec<OsString>) {
        if let Err(e) = run_service() {
            error!(error = %e, "Windows service failed");
        }
    }

    fn run_service() -> windows_service::Result<()> {
        let cancel = CancellationToken::new();
        let on_control = cancel.clone();
        let handle = service_control_handler::register(SERVICE_NAME, move |control| {
            if handle_control(classify(control), &on_control) {
                ServiceControlHandlerResult::NoError
            } else {
                ServiceControlHandlerResult::NotImplemented
            }
        })?;
        handle.set_service_status(status(ServicePhase::StartPending, 0))?;

        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!(error = %e, "tokio runtime could not be started");
                return handle.set_service_status(status(ServicePhase::Stopped, 1));
            }
        };

        let outcome = runtime.block_on(async {
            let stopping = cancel.clone();
            tokio::spawn(async move {
                stopping.cancelled().await;
                report(handle, ServicePhase::StopPending);
            });
            run_agent(data_dir::data_dir(), cancel.clone(), || {
                report(handle, ServicePhase::Running)
            })
            .await
        });
        // No late StopPending after Stopped.
        runtime.shutdown_timeout(Duration::from_secs(5));

        let exit_code = match outcome {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "agent stopped with an error");
                1
            }
        };
        handle.set_service_status(status(ServicePhase::Stopped, exit_code))
    }

    fn report(handle: ServiceStatusHandle, phase: ServicePhase) {
        if let Err(e) = handle.set_service_status(status(phase, 0)) {
            warn!(error = %e, ?phase, "service status report failed");
        }
    }

    fn classify(control: scm::ServiceControl) -> ServiceControl {
        match control {
            scm::ServiceControl::Stop => ServiceControl::Stop,
            scm::ServiceControl::Shutdown => ServiceControl::Shutdown,
            scm::ServiceControl::Interrogate => ServiceControl::Interrogate,
            _ => ServiceControl::Other,
        }
    }

    fn status(phase: ServicePhase, exit_code: u32) -> ServiceStatus {
        ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: match phase {
                ServicePhase::StartPending => ServiceState::StartPending,
                ServicePhase::Running => ServiceState::Running,
                ServicePhase::StopPending => ServiceState::StopPending,
                ServicePhase::Stopped => ServiceState::Stopped,
            },
            controls_accepted: if phase.accepts_stop() {
                ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
            } else {
                ServiceControlAccept::empty()
            },
            exit_code: ServiceExitCode::Win32(exit_code),
            checkpoint: 0,
            wait_hint: phase.wait_hint(),
            process_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_and_shutdown_cancel_the_agent() {
        for control in [ServiceControl::Stop, ServiceControl::Shutdown] {
            let cancel = CancellationToken::new();
            assert!(handle_control(control, &cancel));
            assert!(cancel.is_cancelled(), "{control:?}");
        }
    }

    #[test]
    fn interrogate_is_answered_without_stopping() {
        let cancel = CancellationToken::new();
        assert!(handle_control(ServiceControl::Interrogate, &cancel));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn unknown_controls_are_not_implemented() {
        let cancel = CancellationToken::new();
        assert!(!handle_control(ServiceControl::Other, &cancel));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn only_running_phase_takes_stop_requests() {
        assert!(ServicePhase::Running.accepts_stop());
        assert!(!ServicePhase::StartPending.accepts_stop());
        assert!(!ServicePhase::StopPending.accepts_stop());
        assert!(!ServicePhase::Stopped.accepts_stop());
    }

    #[test]
    fn pending_phases_carry_a_wait_hint() {
        assert!(ServicePhase::StartPending.wait_hint() > Duration::ZERO);
        assert!(ServicePhase::StopPending.wait_hint() > Duration::ZERO);
        assert_eq!(ServicePhase::Running.wait_hint(), Duration::ZERO);
    }
}
