//! Exit monitoring for launcher processes.
//!
//! A [`Monitor`] bridges the blocking wait on a launcher process into the
//! shared event loop. A dedicated waiter thread blocks on the process and
//! hands its raw exit status to the loop through a single-use [`Notifier`];
//! the loop-side callback classifies the status and runs the owner's exit
//! callback. Explicit [`Monitor::stop`] and the natural exit race on the
//! monitor's lock: whichever runs first claims the exit callback and the
//! other becomes a no-op.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use acrn_domain::ShutoffReason;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event_loop::{EventLoopError, EventLoopHandle, Notifier, WatchEvent, WatchId};
use crate::launcher::SupervisedProcess;

const MONITOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::monitor");

/// Callback run with the classified reason when the process exits on its own.
pub type ExitCallback = Box<dyn FnOnce(ShutoffReason) + Send>;

/// Where a monitor is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    /// Waiting for the process to exit.
    Armed,
    /// The exit was observed and delivered.
    Fired,
    /// Torn down by its owner before an exit was delivered.
    Stopped,
}

struct MonitorState {
    phase: MonitorPhase,
    reason: ShutoffReason,
    on_exit: Option<ExitCallback>,
}

struct Shared {
    machine: String,
    state: Mutex<MonitorState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, event: WatchEvent) {
        let (callback, reason) = {
            let mut state = self.lock();
            if state.phase != MonitorPhase::Armed {
                return;
            }
            state.phase = MonitorPhase::Fired;
            state.reason = classify(event);
            (state.on_exit.take(), state.reason)
        };
        info!(
            target: MONITOR_TARGET,
            machine = %self.machine,
            reason = %reason,
            "launcher process exited"
        );
        if let Some(callback) = callback {
            callback(reason);
        }
    }
}

/// Watches one launcher process.
pub struct Monitor {
    shared: Arc<Shared>,
    events: EventLoopHandle,
    watch: WatchId,
    waiter: Mutex<Option<JoinHandle<()>>>,
    pid: u32,
}

impl Monitor {
    /// Arms a monitor over `process`.
    ///
    /// # Errors
    ///
    /// Fails when the watch cannot be registered or the waiter thread cannot
    /// be spawned. Everything allocated by this call is released first and
    /// the still running process is handed back in [`Unarmed`] for the caller
    /// to kill and reap.
    pub fn start(
        events: &EventLoopHandle,
        machine: &str,
        on_exit: ExitCallback,
        process: Box<dyn SupervisedProcess>,
    ) -> Result<Self, Unarmed> {
        let pid = process.pid();
        let shared = Arc::new(Shared {
            machine: machine.to_owned(),
            state: Mutex::new(MonitorState {
                phase: MonitorPhase::Armed,
                reason: ShutoffReason::Unknown,
                on_exit: Some(on_exit),
            }),
        });

        let mut arming = shared.lock();
        let loop_shared = Arc::clone(&shared);
        let registered = events.add_watch(Box::new(move |event| loop_shared.fire(event)));
        let (watch, notifier) = match registered {
            Ok(registered) => registered,
            Err(source) => {
                return Err(Unarmed {
                    process: Some(process),
                    error: MonitorError::Register { source },
                });
            }
        };

        // A failed spawn drops the closure, so the process is recovered here.
        let slot = Arc::new(Mutex::new(Some(process)));
        let waiter_slot = Arc::clone(&slot);
        let waiter = thread::Builder::new()
            .name(format!("monitor-{machine}"))
            .spawn(move || {
                let process = waiter_slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(process) = process {
                    wait_for_exit(process, notifier);
                }
            });
        let waiter = match waiter {
            Ok(waiter) => waiter,
            Err(source) => {
                events.remove_watch(watch);
                arming.phase = MonitorPhase::Stopped;
                arming.on_exit = None;
                let process = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                return Err(Unarmed {
                    process,
                    error: MonitorError::Spawn { source },
                });
            }
        };
        drop(arming);

        debug!(target: MONITOR_TARGET, machine, pid, "monitor armed");
        Ok(Self {
            shared,
            events: events.clone(),
            watch,
            waiter: Mutex::new(Some(waiter)),
            pid,
        })
    }

    /// Process being watched.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Last classified reason; [`ShutoffReason::Unknown`] until fired.
    #[must_use]
    pub fn reason(&self) -> ShutoffReason {
        self.shared.lock().reason
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> MonitorPhase {
        self.shared.lock().phase
    }

    /// Tears the monitor down without running the exit callback.
    ///
    /// Blocks until the waiter thread returns when the exit has not yet been
    /// delivered, so the caller must have arranged for the process to die.
    /// Idempotent.
    pub fn stop(&self) {
        let fired = {
            let mut state = self.shared.lock();
            if state.phase == MonitorPhase::Armed {
                state.phase = MonitorPhase::Stopped;
                state.on_exit = None;
            }
            state.phase == MonitorPhase::Fired
        };
        self.events.remove_watch(self.watch);
        let waiter = self
            .waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(waiter) = waiter else {
            return;
        };
        // After delivery the waiter has nothing left to do but return.
        if fired {
            return;
        }
        if waiter.join().is_err() {
            warn!(
                target: MONITOR_TARGET,
                machine = %self.shared.machine,
                "monitor waiter thread panicked"
            );
        }
    }
}

impl Monitor {
    /// Tears the monitor down without waiting for the process.
    ///
    /// For a process that could not be made to exit: the waiter thread is
    /// left blocked on it and its eventual exit is discarded.
    pub fn detach(self) {
        {
            let mut state = self.shared.lock();
            if state.phase == MonitorPhase::Armed {
                state.phase = MonitorPhase::Stopped;
                state.on_exit = None;
            }
        }
        self.events.remove_watch(self.watch);
        let waiter = self
            .waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if waiter.is_some() {
            warn!(
                target: MONITOR_TARGET,
                machine = %self.shared.machine,
                pid = self.pid,
                "launcher still running; monitor detached"
            );
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_for_exit(mut process: Box<dyn SupervisedProcess>, notifier: Notifier) {
    let status = process.wait();
    drop(process);
    match status {
        Ok(status) => notifier.notify(status.into_raw()),
        Err(error) => {
            warn!(target: MONITOR_TARGET, %error, "waiting for launcher failed");
            drop(notifier);
        }
    }
}

/// Maps a watch event to the reason a machine stopped.
#[must_use]
pub fn classify(event: WatchEvent) -> ShutoffReason {
    match event {
        WatchEvent::Readable(raw) => classify_status(ExitStatus::from_raw(raw)),
        WatchEvent::Hangup => ShutoffReason::Unknown,
    }
}

fn classify_status(status: ExitStatus) -> ShutoffReason {
    if status.signal().is_some() {
        ShutoffReason::Crashed
    } else if status.code().is_some() {
        ShutoffReason::ShutdownByGuest
    } else {
        ShutoffReason::Unknown
    }
}

/// A monitor that could not be armed.
pub struct Unarmed {
    /// The launcher process, still running and not yet reaped.
    pub process: Option<Box<dyn SupervisedProcess>>,
    /// Why arming failed.
    pub error: MonitorError,
}

impl fmt::Debug for Unarmed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unarmed")
            .field("pid", &self.process.as_ref().map(|process| process.pid()))
            .field("error", &self.error)
            .finish()
    }
}

/// Errors raised while arming a monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The event-loop watch could not be registered.
    #[error("failed to register exit watch: {source}")]
    Register {
        /// Underlying event-loop error.
        #[source]
        source: EventLoopError,
    },
    /// The waiter thread could not be spawned.
    #[error("failed to spawn monitor thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
