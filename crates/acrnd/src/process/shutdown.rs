//! Termination signal handling.
//!
//! The first termination signal starts an orderly stop in which every
//! running machine is destroyed. The control tool enforces no timeout of
//! its own, so a second signal abandons that teardown and exits at once;
//! the runtime files it leaves behind are recovered by the next start.

use std::fmt;
use std::io;
use std::process;
use std::thread;

use nix::sys::signal::Signal;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;

/// Signals that stop the supervisor.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Exit status used when a second signal abandons machine teardown.
const ABANDONED_EXIT_STATUS: i32 = 2;

/// Why the supervisor is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A termination signal arrived.
    Signal(i32),
    /// The notification source closed without delivering anything.
    SourceClosed,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(number) => match Signal::try_from(*number) {
                Ok(signal) => f.write_str(signal.as_str()),
                Err(_) => write!(f, "signal {number}"),
            },
            Self::SourceClosed => f.write_str("signal source closed"),
        }
    }
}

/// Source of the request to stop the supervisor.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until the supervisor should stop.
    ///
    /// # Errors
    ///
    /// Fails when the notification mechanism cannot be installed.
    fn wait(&self) -> Result<ShutdownCause, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Listener for [`TERMINATION_SIGNALS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds the listener. Handlers are installed on the first wait.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<ShutdownCause, ShutdownError> {
        let mut signals =
            Signals::new(TERMINATION_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        let Some(first) = signals.forever().next() else {
            return Ok(ShutdownCause::SourceClosed);
        };
        let cause = ShutdownCause::Signal(first);
        info!(target: PROCESS_TARGET, %cause, "termination requested");

        let escalation = thread::Builder::new()
            .name("shutdown-escalation".to_owned())
            .spawn(move || {
                if let Some(second) = signals.forever().next() {
                    warn!(
                        target: PROCESS_TARGET,
                        cause = %ShutdownCause::Signal(second),
                        "second termination signal; abandoning machine teardown"
                    );
                    process::exit(ABANDONED_EXIT_STATUS);
                }
            });
        if let Err(error) = escalation {
            warn!(target: PROCESS_TARGET, %error, "cannot watch for a second termination signal");
        }
        Ok(cause)
    }
}
