//! Errors raised while starting, running and stopping the supervisor process.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTimeError;

use acrn_config::RuntimePathsError;
use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::telemetry::TelemetryError;

use super::daemonizer::DaemonizeError;
use super::shutdown::ShutdownError;

/// Operation on a runtime artefact that can fail with an IO error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFileOp {
    /// Creating the singleton lock.
    CreateLock,
    /// Removing a lock or pid file left by a dead supervisor.
    RemoveStale,
    /// Publishing the pid.
    WritePid,
    /// Publishing the health snapshot.
    WriteHealth,
}

impl fmt::Display for RuntimeFileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateLock => "create lock file",
            Self::RemoveStale => "remove stale file",
            Self::WritePid => "write pid file",
            Self::WriteHealth => "write health snapshot",
        })
    }
}

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The runtime directory is unusable.
    #[error(transparent)]
    RuntimeDirectory(#[from] RuntimePathsError),
    /// A runtime artefact could not be created, written or removed.
    #[error("failed to {op} '{path}': {source}")]
    RuntimeFile {
        /// What was being done to the artefact.
        op: RuntimeFileOp,
        /// Artefact path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A live supervisor already holds the lock.
    #[error("supervisor already running with pid {pid}")]
    AlreadyRunning {
        /// Pid recorded by the live supervisor.
        pid: u32,
    },
    /// Probing the recorded owner of the lock failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// Pid that could not be probed.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Health was published before the pid.
    #[error("pid must be written before updating health state")]
    MissingPid,
    /// The health snapshot could not be rendered.
    #[error("failed to render health snapshot: {source}")]
    HealthSnapshot {
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
    /// The system clock is before the epoch.
    #[error("failed to read system time: {source}")]
    Clock {
        /// Underlying system time error.
        #[source]
        source: SystemTimeError,
    },
    /// Detaching from the terminal failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Waiting for a termination signal failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// Preparing the host or opening the driver failed.
    #[error("supervisor bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
}

impl LaunchError {
    pub(super) fn runtime_file(op: RuntimeFileOp, path: &Path, source: io::Error) -> Self {
        Self::RuntimeFile {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<serde_json::Error> for LaunchError {
    fn from(source: serde_json::Error) -> Self {
        Self::HealthSnapshot { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}
