//! Runtime state of a supervised machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a machine is shut off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutoffReason {
    /// Never ran, or the exit could not be classified.
    #[default]
    Unknown,
    /// Stopped by an operator shutdown request.
    Shutdown,
    /// Forcibly destroyed by an operator.
    Destroyed,
    /// The launcher process was killed by a signal.
    Crashed,
    /// The launcher process exited on its own.
    ShutdownByGuest,
}

impl ShutoffReason {
    /// Canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Shutdown => "shutdown",
            Self::Destroyed => "destroyed",
            Self::Crashed => "crashed",
            Self::ShutdownByGuest => "shutdown_by_guest",
        }
    }
}

impl fmt::Display for ShutoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a machine is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningReason {
    /// Booted by a start request.
    #[default]
    Booted,
}

impl fmt::Display for RunningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Booted => f.write_str("booted"),
        }
    }
}

/// The lifecycle state of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum MachineState {
    /// Not running.
    Shutoff(ShutoffReason),
    /// Running under supervision.
    Running(RunningReason),
}

impl MachineState {
    /// Whether the machine has a live launcher process.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::Shutoff(ShutoffReason::Unknown)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutoff(reason) => write!(f, "shutoff ({reason})"),
            Self::Running(reason) => write!(f, "running ({reason})"),
        }
    }
}
