//! Startup and teardown ordering of the supervisor process.

use std::env;
use std::sync::Arc;

use acrn_config::RuntimePaths;
use tracing::info;

use crate::bootstrap::{
    ConfigLoader, HostProvider, SystemConfigLoader, SystemHostProvider, bootstrap_with,
};
use crate::lifecycle::{LifecycleReporter, StructuredLifecycleReporter};
use crate::telemetry;

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; used under service managers and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control daemon lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the supervisor runtime.
pub(crate) struct ServiceDeps<L, P> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn LifecycleReporter>,
    pub(crate) provider: P,
}

/// Collaborators required to launch the supervisor.
pub(crate) struct LaunchPlan<L, P, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) services: ServiceDeps<L, P>,
}

/// Runs the daemon using the production collaborators.
///
/// # Errors
///
/// See [`LaunchError`].
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer::new(),
            shutdown: SystemShutdownSignal::new(),
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredLifecycleReporter::new()),
            provider: SystemHostProvider,
        },
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, P, D, S>(plan: LaunchPlan<L, P, D, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    P: HostProvider,
    D: Daemonizer,
    S: ShutdownSignal,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;
    let ServiceDeps {
        loader,
        reporter,
        provider,
    } = services;

    let config = loader.load()?;
    telemetry::initialise(&config)?;
    info!(
        target: PROCESS_TARGET,
        ?mode,
        "starting supervisor"
    );
    let runtime_paths = RuntimePaths::from_config(&config)?;
    let mut guard = ProcessGuard::acquire(runtime_paths)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(guard.paths())?;
    }
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting, 0)?;

    let driver = bootstrap_with(&config, reporter, &provider)?;
    guard.write_health(HealthState::Ready, driver.machine_count())?;
    let cause = shutdown.wait();
    let stopping = guard.write_health(HealthState::Stopping, driver.machine_count());
    if let Ok(cause) = &cause {
        info!(
            target: PROCESS_TARGET,
            %cause,
            machines = driver.machine_count(),
            "stopping supervisor"
        );
    }
    driver.close();
    cause?;
    stopping?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}
