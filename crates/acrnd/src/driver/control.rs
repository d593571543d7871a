//! Machine state transitions.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use acrn_domain::{MachineDefinition, MachineState, RunningReason, ShutoffReason, validate};
use tracing::{debug, info, warn};

use super::machine::{MachineRecord, lock};
use super::{DRIVER_TARGET, DriverError, DriverInner, StartError};
use crate::launcher::SupervisedProcess;
use crate::lifecycle::{DefinedReason, LifecycleEvent, UndefinedReason};
use crate::monitor::{ExitCallback, Monitor};
use crate::resources::destroy_network_taps;
use crate::synth::{SynthesisContext, synthesize};

impl DriverInner {
    pub(super) fn load(&self, definitions: Vec<MachineDefinition>) {
        let mut table = self.table();
        let mut loaded = 0_usize;
        for def in definitions {
            if let Some(owner) = table.uuid_owner(def.uuid, &def.name) {
                warn!(
                    target: DRIVER_TARGET,
                    machine = %def.name,
                    owner,
                    "skipping persisted definition with duplicate uuid"
                );
                continue;
            }
            let (_, inserted) = table.insert_if_absent(&def, true);
            if inserted {
                loaded += 1;
            }
        }
        info!(target: DRIVER_TARGET, loaded, "persisted machines loaded");
    }

    fn check_uuid(&self, def: &MachineDefinition) -> Result<(), DriverError> {
        match self.table().uuid_owner(def.uuid, &def.name) {
            Some(owner) => Err(DriverError::DuplicateUuid {
                name: owner.to_owned(),
                uuid: def.uuid,
            }),
            None => Ok(()),
        }
    }

    pub(super) fn define(&self, def: MachineDefinition) -> Result<(), DriverError> {
        validate(&def)?;
        self.check_uuid(&def)?;
        let name = def.name.clone();
        loop {
            let (handle, added) = self.table().insert_if_absent(&def, true);
            let mut record = lock(&handle);
            if record.removed {
                continue;
            }
            if added {
                if let Err(error) = self.store.save(&def) {
                    self.forget(&mut record);
                    return Err(error.into());
                }
                self.reporter
                    .report(&name, LifecycleEvent::Defined(DefinedReason::Added));
                return Ok(());
            }

            self.store.save(&def)?;
            self.table().set_uuid(&name, def.uuid);
            record.persistent = true;
            if record.state.is_active() {
                debug!(target: DRIVER_TARGET, machine = %name, "definition staged until shutoff");
                record.next_def = Some(def);
            } else {
                record.def = def;
            }
            self.reporter
                .report(&name, LifecycleEvent::Defined(DefinedReason::Updated));
            return Ok(());
        }
    }

    pub(super) fn undefine(&self, name: &str) -> Result<(), DriverError> {
        self.with_machine(name, |record| {
            if !record.persistent {
                return Err(DriverError::Transient {
                    name: name.to_owned(),
                });
            }
            self.store.delete(name)?;
            record.persistent = false;
            record.next_def = None;
            self.reporter
                .report(name, LifecycleEvent::Undefined(UndefinedReason::Removed));
            if !record.state.is_active() {
                self.forget(record);
            }
            Ok(())
        })
    }

    pub(super) fn create(self: &Arc<Self>, def: MachineDefinition) -> Result<(), DriverError> {
        validate(&def)?;
        self.check_uuid(&def)?;
        let name = def.name.clone();
        let (handle, added) = self.table().insert_if_absent(&def, false);
        if !added {
            return Err(DriverError::AlreadyExists { name });
        }
        let mut record = lock(&handle);
        match self.start_locked(&mut record) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.forget(&mut record);
                Err(error)
            }
        }
    }

    pub(super) fn start(self: &Arc<Self>, name: &str) -> Result<(), DriverError> {
        self.with_machine(name, |record| self.start_locked(record))
    }

    pub(super) fn shutdown(&self, name: &str) -> Result<(), DriverError> {
        self.with_machine(name, |record| {
            if !record.state.is_active() {
                return Err(DriverError::InvalidState {
                    name: name.to_owned(),
                    operation: "shut down",
                    state: record.state,
                });
            }
            self.stop_running(record, ShutoffReason::Shutdown)
        })
    }

    pub(super) fn destroy(&self, name: &str) -> Result<(), DriverError> {
        self.with_machine(name, |record| self.destroy_locked(record))
    }

    pub(super) fn destroy_locked(&self, record: &mut MachineRecord) -> Result<(), DriverError> {
        if !record.state.is_active() {
            debug!(target: DRIVER_TARGET, machine = %record.name(), "destroy of shut-off machine ignored");
            return Ok(());
        }
        self.stop_running(record, ShutoffReason::Destroyed)
    }

    fn start_locked(self: &Arc<Self>, record: &mut MachineRecord) -> Result<(), DriverError> {
        let name = record.name().to_owned();
        if record.state.is_active() {
            return Err(DriverError::InvalidState {
                name,
                operation: "start",
                state: record.state,
            });
        }
        let capacity_id = self
            .table()
            .capacity
            .acquire(record.id)
            .map_err(|source| DriverError::CapacityExhausted {
                name: name.clone(),
                source,
            });
        let capacity_id = match capacity_id {
            Ok(id) => id,
            Err(error) => {
                self.reporter.start_failed(&name, &error);
                return Err(error);
            }
        };
        record.capacity_id = Some(capacity_id);
        record.generation = self.runs.fetch_add(1, Ordering::Relaxed) + 1;

        match self.launch(record) {
            Ok(monitor) => {
                record.monitor = Some(monitor);
                record.state = MachineState::Running(RunningReason::Booted);
                self.reporter
                    .report(&name, LifecycleEvent::Started(RunningReason::Booted));
                Ok(())
            }
            Err(source) => {
                self.release_host_resources(record);
                let error = DriverError::StartFailed { name: name.clone(), source };
                self.reporter.start_failed(&name, &error);
                Err(error)
            }
        }
    }

    fn launch(self: &Arc<Self>, record: &mut MachineRecord) -> Result<Monitor, StartError> {
        let mut ctx = SynthesisContext {
            devices: &*self.devices,
            resources: &mut record.resources,
            capacity_id: record.capacity_id,
        };
        let command = synthesize(&self.launcher_path, &record.def, &mut ctx)?;
        let process = self.launcher.spawn(&command)?;
        let pid = process.pid();
        let on_exit = self.exit_callback(record);
        Monitor::start(&self.events, record.name(), on_exit, process).map_err(|unarmed| {
            self.reap_unmonitored(record.name(), pid, unarmed.process);
            StartError::Monitor(unarmed.error)
        })
    }

    /// Kills and waits for a launcher that no monitor is watching.
    fn reap_unmonitored(
        &self,
        machine: &str,
        pid: u32,
        process: Option<Box<dyn SupervisedProcess>>,
    ) {
        if let Err(error) = self.launcher.kill(pid) {
            warn!(
                target: DRIVER_TARGET,
                machine,
                pid,
                %error,
                "failed to kill unmonitored launcher"
            );
            return;
        }
        if let Some(mut process) = process
            && let Err(error) = process.wait()
        {
            warn!(
                target: DRIVER_TARGET,
                machine,
                pid,
                %error,
                "failed to reap unmonitored launcher"
            );
        }
    }

    fn exit_callback(self: &Arc<Self>, record: &MachineRecord) -> ExitCallback {
        let driver = Arc::downgrade(self);
        let name = record.name().to_owned();
        let generation = record.generation;
        Box::new(move |reason| {
            if let Some(driver) = driver.upgrade() {
                driver.handle_exit(&name, generation, reason);
            }
        })
    }

    /// Applies an asynchronous exit. Runs on the event-loop thread.
    fn handle_exit(&self, name: &str, generation: u64, reason: ShutoffReason) {
        let Some(handle) = self.table().get(name) else {
            debug!(target: DRIVER_TARGET, machine = name, "exit for untracked machine");
            return;
        };
        let mut record = lock(&handle);
        if record.removed || record.generation != generation || !record.state.is_active() {
            debug!(target: DRIVER_TARGET, machine = name, "stale exit notification ignored");
            return;
        }
        let monitor = record.monitor.take();
        self.to_shutoff(&mut record, reason);
        drop(monitor);
    }

    fn stop_running(
        &self,
        record: &mut MachineRecord,
        reason: ShutoffReason,
    ) -> Result<(), DriverError> {
        let name = record.name().to_owned();
        let mut unkillable = None;
        if let Err(error) = self.launcher.stop(&name) {
            warn!(target: DRIVER_TARGET, machine = %name, %error, "stop tool failed; killing launcher");
            if let Some(monitor) = &record.monitor
                && let Err(source) = self.launcher.kill(monitor.pid())
            {
                warn!(
                    target: DRIVER_TARGET,
                    machine = %name,
                    pid = monitor.pid(),
                    error = %source,
                    "launcher could not be killed; releasing its resources anyway"
                );
                unkillable = Some(DriverError::StopFailed { name, source });
            }
        }
        // Joining the waiter of a live process would block forever.
        if let Some(monitor) = record.monitor.take() {
            if unkillable.is_some() {
                monitor.detach();
            } else {
                monitor.stop();
            }
        }
        self.to_shutoff(record, reason);
        unkillable.map_or(Ok(()), Err)
    }

    /// Releases everything a run held, records the stop and forgets a
    /// transient machine.
    fn to_shutoff(&self, record: &mut MachineRecord, reason: ShutoffReason) {
        self.release_host_resources(record);
        record.state = MachineState::Shutoff(reason);
        if let Some(next) = record.next_def.take() {
            record.def = next;
        }
        let name = record.name().to_owned();
        info!(target: DRIVER_TARGET, machine = %name, %reason, "machine shut off");
        self.reporter.report(&name, LifecycleEvent::Stopped(reason));
        if !record.persistent {
            self.forget(record);
        }
    }

    fn release_host_resources(&self, record: &mut MachineRecord) {
        destroy_network_taps(&*self.devices, &mut record.resources, &self.tap_retry);
        record.resources.ptys_mut().reset();
        if record.capacity_id.take().is_some() {
            self.table().capacity.release(record.id);
        }
    }

    fn forget(&self, record: &mut MachineRecord) {
        record.removed = true;
        self.table().remove(record.name());
        debug!(target: DRIVER_TARGET, machine = %record.name(), "machine forgotten");
    }
}
