//! Lifecycle events emitted by the driver.

use std::fmt;
use std::sync::Arc;

use acrn_domain::{RunningReason, ShutoffReason};

use crate::driver::DriverError;

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Why a definition event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinedReason {
    /// A new machine was defined.
    Added,
    /// An existing definition was replaced.
    Updated,
}

/// Why an undefinition event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedReason {
    /// The persisted definition was removed.
    Removed,
}

/// A machine lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The machine began running.
    Started(RunningReason),
    /// The machine stopped.
    Stopped(ShutoffReason),
    /// The machine was defined.
    Defined(DefinedReason),
    /// The machine was undefined.
    Undefined(UndefinedReason),
}

impl LifecycleEvent {
    /// Event name used in structured logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Stopped(_) => "stopped",
            Self::Defined(_) => "defined",
            Self::Undefined(_) => "undefined",
        }
    }

    /// Sub-reason used in structured logs.
    #[must_use]
    pub const fn detail(&self) -> &'static str {
        match self {
            Self::Started(RunningReason::Booted) => "booted",
            Self::Stopped(reason) => reason.as_str(),
            Self::Defined(DefinedReason::Added) => "added",
            Self::Defined(DefinedReason::Updated) => "updated",
            Self::Undefined(UndefinedReason::Removed) => "removed",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.detail())
    }
}

/// Observer for machine lifecycle transitions.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked after a machine transitions.
    fn report(&self, machine: &str, event: LifecycleEvent);

    /// Invoked when a start attempt fails and has been rolled back.
    fn start_failed(&self, machine: &str, error: &DriverError);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn report(&self, machine: &str, event: LifecycleEvent) {
        (**self).report(machine, event);
    }

    fn start_failed(&self, machine: &str, error: &DriverError) {
        (**self).start_failed(machine, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn report(&self, machine: &str, event: LifecycleEvent) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = event.name(),
            detail = event.detail(),
            machine,
            "machine {event}"
        );
    }

    fn start_failed(&self, machine: &str, error: &DriverError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "start_failed",
            machine,
            kind = ?error.kind(),
            rolled_back = error.rolled_back(),
            error = %error,
            "machine failed to start"
        );
    }
}
