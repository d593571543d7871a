//! Daemon process supervision: singleton guard, daemonisation, shutdown
//! signals and the launch sequence.

pub(crate) mod daemonizer;
mod errors;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use daemonizer::DaemonizeError;
pub use errors::{LaunchError, RuntimeFileOp};
pub use launch::{LaunchMode, run_daemon};
pub use shutdown::ShutdownError;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "ACRND_FOREGROUND";
