//! Error surface of the lifecycle controller.

use std::io;

use acrn_domain::{DefinitionError, MachineState};
use thiserror::Error;

use crate::event_loop::EventLoopError;
use crate::launcher::LauncherError;
use crate::monitor::MonitorError;
use crate::resources::{CapacityExhausted, InvalidCapacityId};
use crate::store::StoreError;
use crate::synth::SynthesisError;

/// Coarse classification callers use to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The definition cannot be expressed. Never retried.
    Configuration,
    /// A fixed host ceiling was reached. Fails closed.
    ResourceExhausted,
    /// The launcher, control tool or a host network tool failed.
    ExternalTool,
    /// The machine is not in a state that permits the operation.
    InvalidState,
    /// No machine with that name is tracked.
    NotFound,
    /// A supervisor-side failure.
    Internal,
}

/// Why a start attempt failed after resources were committed.
#[derive(Debug, Error)]
pub enum StartError {
    /// Building the launcher command failed.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    /// Spawning the launcher failed.
    #[error(transparent)]
    Launch(#[from] LauncherError),
    /// Arming the exit monitor failed.
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Errors returned by driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The definition failed validation.
    #[error("invalid definition: {source}")]
    Definition {
        /// Validation failure.
        #[source]
        source: DefinitionError,
    },
    /// Another machine already uses the identifier.
    #[error("machine '{name}' already uses uuid {uuid}")]
    DuplicateUuid {
        /// Machine holding the identifier.
        name: String,
        /// Contested identifier.
        uuid: uuid::Uuid,
    },
    /// No machine with that name is tracked.
    #[error("no machine named '{name}'")]
    NotFound {
        /// Requested machine.
        name: String,
    },
    /// A machine with that name is already tracked.
    #[error("machine '{name}' already exists")]
    AlreadyExists {
        /// Requested machine.
        name: String,
    },
    /// The machine's state does not permit the operation.
    #[error("cannot {operation} machine '{name}' while {state}")]
    InvalidState {
        /// Machine.
        name: String,
        /// Attempted operation.
        operation: &'static str,
        /// State observed under the machine's lock.
        state: MachineState,
    },
    /// The machine has no persisted definition.
    #[error("cannot undefine transient machine '{name}'")]
    Transient {
        /// Machine.
        name: String,
    },
    /// No capacity identifier was free. Nothing was allocated.
    #[error("cannot start machine '{name}': {source}")]
    CapacityExhausted {
        /// Machine.
        name: String,
        /// Pool state.
        #[source]
        source: CapacityExhausted,
    },
    /// A start attempt failed and every resource it took was released.
    #[error("failed to start machine '{name}': {source}")]
    StartFailed {
        /// Machine.
        name: String,
        /// Failing step.
        #[source]
        source: StartError,
    },
    /// Neither the control tool nor a kill could stop the launcher. The
    /// machine is shut off and its host resources released regardless.
    #[error("failed to stop machine '{name}': {source}")]
    StopFailed {
        /// Machine.
        name: String,
        /// Final failure.
        #[source]
        source: LauncherError,
    },
    /// Querying the launcher failed.
    #[error("launcher query failed: {source}")]
    Launcher {
        /// Underlying launcher error.
        #[source]
        source: LauncherError,
    },
    /// The definition store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The configured capacity pool is malformed.
    #[error(transparent)]
    CapacityPool(#[from] InvalidCapacityId),
    /// The machine has no pseudo-terminal console.
    #[error("machine '{name}' has no pty console")]
    NoConsole {
        /// Machine.
        name: String,
    },
    /// Duplicating a console descriptor failed.
    #[error("failed to open console of '{name}': {source}")]
    Console {
        /// Machine.
        name: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Rendering a description failed.
    #[error("failed to describe machine '{name}': {source}")]
    Describe {
        /// Machine.
        name: String,
        /// Underlying encode error.
        #[source]
        source: serde_json::Error,
    },
    /// The shared event loop could not be started.
    #[error(transparent)]
    EventLoop(#[from] EventLoopError),
}

impl DriverError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Definition { .. } | Self::DuplicateUuid { .. } => ErrorKind::Configuration,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. }
            | Self::InvalidState { .. }
            | Self::Transient { .. }
            | Self::NoConsole { .. } => ErrorKind::InvalidState,
            Self::CapacityExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::StartFailed { source, .. } => match source {
                StartError::Synthesis(error) if error.is_exhaustion() => {
                    ErrorKind::ResourceExhausted
                }
                StartError::Synthesis(error) if error.is_host_failure() => ErrorKind::ExternalTool,
                StartError::Synthesis(_) => ErrorKind::Configuration,
                StartError::Launch(_) => ErrorKind::ExternalTool,
                StartError::Monitor(_) => ErrorKind::Internal,
            },
            Self::StopFailed { .. } | Self::Launcher { .. } => ErrorKind::ExternalTool,
            Self::Store(_)
            | Self::CapacityPool(_)
            | Self::Console { .. }
            | Self::Describe { .. }
            | Self::EventLoop(_) => ErrorKind::Internal,
        }
    }

    /// Whether the operation got part way and was rolled back, as opposed
    /// to failing before anything happened. Both are safe to retry.
    #[must_use]
    pub const fn rolled_back(&self) -> bool {
        matches!(self, Self::StartFailed { .. })
    }
}

impl From<DefinitionError> for DriverError {
    fn from(source: DefinitionError) -> Self {
        Self::Definition { source }
    }
}
