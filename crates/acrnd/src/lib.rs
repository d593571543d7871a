//! Supervisor for ACRN virtual machines.
//!
//! `acrnd` turns validated machine definitions into running device-model
//! processes and keeps its view of each machine consistent with what the
//! host actually runs. A machine start allocates host resources (a capacity
//! identifier, tap devices, pseudo-terminals), synthesises the launcher
//! command line, spawns the launcher and arms an exit monitor. Every stop,
//! whether requested or caused by the guest, releases exactly what the run
//! held and reports a lifecycle event.
//!
//! The [`Driver`] is the runtime context. It is constructed explicitly by
//! [`bootstrap_with`] (or [`Driver::open`] directly) and owns the tracked
//! machines, the capacity pool and the shared [`EventLoop`] through which
//! exit notifications are delivered. The host-facing collaborators sit
//! behind traits ([`ProcessLauncher`], [`HostDevices`],
//! [`DefinitionStore`], [`LifecycleReporter`]) so the controller can be
//! exercised without a hypervisor.
//!
//! The `acrnd` binary wraps the driver in daemon plumbing: layered
//! configuration, structured telemetry, a singleton lock with stale-lock
//! recovery, optional daemonisation, host CPU offlining and a signal-driven
//! shutdown that destroys every running machine.

mod bootstrap;
pub mod driver;
pub mod event_loop;
mod files;
pub mod host;
pub mod launcher;
pub mod lifecycle;
pub mod monitor;
mod process;
pub mod resources;
pub mod retry;
pub mod store;
pub mod synth;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, HostProvider, SystemConfigLoader, SystemHostProvider,
    bootstrap_with,
};
pub use driver::{
    Driver, DriverDeps, DriverError, DriverSettings, ErrorKind, MachineInfo, StartError, VcpuInfo,
};
pub use event_loop::EventLoop;
pub use host::{HostCpus, HostError, NodeInfo};
pub use launcher::{LauncherError, ProcessLauncher, SupervisedProcess, SystemLauncher};
pub use lifecycle::{LifecycleEvent, LifecycleReporter, StructuredLifecycleReporter};
pub use process::{
    DaemonizeError, LaunchError, LaunchMode, RuntimeFileOp, ShutdownError, run_daemon,
};
pub use resources::HostDevices;
pub use store::{DefinitionStore, FileDefinitionStore, StoreError};
pub use synth::LaunchCommand;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
