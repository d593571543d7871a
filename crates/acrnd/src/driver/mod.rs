//! The lifecycle controller.
//!
//! [`Driver`] is the explicitly constructed runtime context: it owns the
//! tracked machines, the capacity pool and the shared event loop, and holds
//! the host collaborators behind trait objects. Every transition of a machine
//! runs under that machine's lock; asynchronous exits take the same lock, so
//! an explicit destroy and a natural exit are strictly ordered and the second
//! observes the machine already shut off.

mod control;
mod errors;
mod machine;
mod query;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use acrn_config::Config;
use acrn_domain::MachineDefinition;
use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::event_loop::{EventLoop, EventLoopHandle};
use crate::host::NodeInfo;
use crate::launcher::ProcessLauncher;
use crate::lifecycle::LifecycleReporter;
use crate::resources::{CapacityPool, HostDevices, InvalidCapacityId};
use crate::retry::RetryPolicy;
use crate::store::DefinitionStore;

pub use errors::{DriverError, ErrorKind, StartError};
pub use query::{MachineInfo, VcpuInfo};

use machine::{MachineHandle, MachineTable, lock};

pub(crate) const DRIVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::driver");

/// Tunables the driver takes from configuration.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Launcher executable placed at the head of synthesised commands.
    pub launcher_path: Utf8PathBuf,
    /// Capacity identifiers available to running machines.
    pub capacity: CapacityPool,
    /// Retry policy for deleting taps after a machine stops.
    pub tap_retry: RetryPolicy,
}

impl DriverSettings {
    /// Derives settings from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails when a configured capacity identifier is not a UUID.
    pub fn from_config(config: &Config) -> Result<Self, InvalidCapacityId> {
        Ok(Self {
            launcher_path: config.launcher_path().to_owned(),
            capacity: CapacityPool::from_ids(config.capacity_ids())?,
            tap_retry: RetryPolicy::new(config.tap_delete_attempts(), config.tap_delete_delay()),
        })
    }
}

/// Collaborators injected into the driver.
pub struct DriverDeps {
    /// Configuration-derived settings.
    pub settings: DriverSettings,
    /// Starts and stops launcher processes.
    pub launcher: Arc<dyn ProcessLauncher>,
    /// Creates taps and pseudo-terminals.
    pub devices: Arc<dyn HostDevices>,
    /// Persists definitions.
    pub store: Arc<dyn DefinitionStore>,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn LifecycleReporter>,
    /// Host facts captured at startup.
    pub node: NodeInfo,
}

pub(crate) struct DriverInner {
    launcher_path: Utf8PathBuf,
    tap_retry: RetryPolicy,
    launcher: Arc<dyn ProcessLauncher>,
    devices: Arc<dyn HostDevices>,
    store: Arc<dyn DefinitionStore>,
    reporter: Arc<dyn LifecycleReporter>,
    node: NodeInfo,
    events: EventLoopHandle,
    table: Mutex<MachineTable>,
    /// Source of run generations, unique across every record.
    runs: AtomicU64,
}

impl DriverInner {
    fn table(&self) -> MutexGuard<'_, MachineTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, name: &str) -> Result<MachineHandle, DriverError> {
        self.table().get(name).ok_or_else(|| DriverError::NotFound {
            name: name.to_owned(),
        })
    }

    /// Runs `f` on a machine under its lock.
    fn with_machine<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut machine::MachineRecord) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let handle = self.lookup(name)?;
        let mut record = lock(&handle);
        if record.removed {
            return Err(DriverError::NotFound {
                name: name.to_owned(),
            });
        }
        f(&mut record)
    }
}

/// The supervisor runtime context.
///
/// Dropping an open driver closes it.
pub struct Driver {
    inner: Arc<DriverInner>,
    events: EventLoop,
    closed: AtomicBool,
}

impl Driver {
    /// Starts the event loop and loads persisted definitions. Loaded
    /// machines start shut off.
    ///
    /// # Errors
    ///
    /// Fails when the event loop cannot start or the store cannot be read.
    pub fn open(deps: DriverDeps) -> Result<Self, DriverError> {
        let DriverDeps {
            settings,
            launcher,
            devices,
            store,
            reporter,
            node,
        } = deps;
        let definitions = store.load_all()?;
        let events = EventLoop::start()?;
        let inner = Arc::new(DriverInner {
            launcher_path: settings.launcher_path,
            tap_retry: settings.tap_retry,
            launcher,
            devices,
            store,
            reporter,
            node,
            events: events.handle(),
            table: Mutex::new(MachineTable::new(settings.capacity)),
            runs: AtomicU64::new(0),
        });
        inner.load(definitions);
        Ok(Self {
            inner,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Destroys every running machine and stops the event loop. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles = self.inner.table().handles();
        for handle in handles {
            let mut record = lock(&handle);
            if record.removed || !record.state.is_active() {
                continue;
            }
            let name = record.name().to_owned();
            if let Err(error) = self.inner.destroy_locked(&mut record) {
                warn!(target: DRIVER_TARGET, machine = %name, %error, "failed to destroy machine on close");
            }
        }
        self.events.shutdown();
        info!(target: DRIVER_TARGET, "driver closed");
    }

    /// Number of tracked machines.
    #[must_use]
    pub fn machine_count(&self) -> usize {
        self.inner.table().len()
    }

    /// Defines or redefines a persistent machine.
    ///
    /// # Errors
    ///
    /// See [`DriverError`].
    pub fn define(&self, def: MachineDefinition) -> Result<(), DriverError> {
        self.inner.define(def)
    }

    /// Removes a machine's persisted definition.
    ///
    /// # Errors
    ///
    /// See [`DriverError`].
    pub fn undefine(&self, name: &str) -> Result<(), DriverError> {
        self.inner.undefine(name)
    }

    /// Adds and starts a transient machine.
    ///
    /// # Errors
    ///
    /// See [`DriverError`].
    pub fn create(&self, def: MachineDefinition) -> Result<(), DriverError> {
        self.inner.create(def)
    }

    /// Starts a defined machine.
    ///
    /// # Errors
    ///
    /// See [`DriverError`].
    pub fn start(&self, name: &str) -> Result<(), DriverError> {
        self.inner.start(name)
    }

    /// Gracefully stops a running machine.
    ///
    /// # Errors
    ///
    /// See [`DriverError`].
    pub fn shutdown(&self, name: &str) -> Result<(), DriverError> {
        self.inner.shutdown(name)
    }

    /// Forcibly stops a machine. A shut-off machine is left untouched.
    ///
    /// # Errors
    ///
    /// See [`DriverError`].
    pub fn destroy(&self, name: &str) -> Result<(), DriverError> {
        self.inner.destroy(name)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}
