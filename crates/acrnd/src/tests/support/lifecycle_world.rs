//! Machine lifecycle world driving a real driver over in-memory doubles.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use acrn_domain::{MachineDefinition, MachineState, ShutoffReason};

use super::process_world::{POLL_INTERVAL, StepResult, WAIT_TIMEOUT};
use super::{
    FakeHostDevices, FakeLauncher, MemoryDefinitionStore, RecordingLifecycleReporter,
    networked_machine, open_test_driver,
};
use crate::driver::{Driver, DriverError, MachineInfo};
use crate::lifecycle::LifecycleEvent;

/// Name given to machine `index` in scenarios.
pub fn machine_name(index: usize) -> String {
    format!("vm{index}")
}

fn definition(index: usize) -> MachineDefinition {
    let uuid = u128::try_from(index).expect("machine index fits a uuid");
    networked_machine(&machine_name(index), uuid)
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) -> StepResult {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if done() {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(format!("timed out waiting for {what}"))
}

pub struct LifecycleTestWorld {
    launcher: FakeLauncher,
    devices: FakeHostDevices,
    store: MemoryDefinitionStore,
    reporter: Arc<RecordingLifecycleReporter>,
    driver: Option<Driver>,
    last_error: Option<DriverError>,
}

impl Default for LifecycleTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleTestWorld {
    pub fn new() -> Self {
        Self {
            launcher: FakeLauncher::new(),
            devices: FakeHostDevices::new(),
            store: MemoryDefinitionStore::new(),
            reporter: Arc::new(RecordingLifecycleReporter::default()),
            driver: None,
            last_error: None,
        }
    }

    pub fn open(&mut self, capacity: usize) {
        self.driver = Some(open_test_driver(
            capacity,
            Arc::new(self.launcher.clone()),
            Arc::new(self.devices.clone()),
            Arc::new(self.store.clone()),
            Arc::<RecordingLifecycleReporter>::clone(&self.reporter),
        ));
    }

    fn driver(&self) -> Result<&Driver, String> {
        self.driver
            .as_ref()
            .ok_or_else(|| "supervisor has not been opened".to_owned())
    }

    pub const fn launcher(&self) -> &FakeLauncher {
        &self.launcher
    }

    pub const fn devices(&self) -> &FakeHostDevices {
        &self.devices
    }

    pub const fn last_error(&self) -> Option<&DriverError> {
        self.last_error.as_ref()
    }

    /// Runs a driver operation, keeping its error for later steps.
    fn attempt(
        &mut self,
        op: impl FnOnce(&Driver) -> Result<(), DriverError>,
    ) -> StepResult {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| "supervisor has not been opened".to_owned())?;
        self.last_error = op(driver).err();
        Ok(())
    }

    /// Runs a driver operation that must succeed.
    fn require(&mut self, op: impl FnOnce(&Driver) -> Result<(), DriverError>) -> StepResult {
        self.attempt(op)?;
        match self.last_error.take() {
            Some(error) => Err(error.to_string()),
            None => Ok(()),
        }
    }

    pub fn define(&mut self, index: usize) -> StepResult {
        let def = definition(index);
        self.require(|driver| driver.define(def))
    }

    pub fn redefine_with_vcpus(&mut self, index: usize, vcpus: u32) -> StepResult {
        let mut def = definition(index);
        def.vcpus = vcpus;
        self.require(|driver| driver.define(def))
    }

    pub fn create(&mut self, index: usize) -> StepResult {
        let def = definition(index);
        self.require(|driver| driver.create(def))
    }

    pub fn start(&mut self, index: usize) -> StepResult {
        let name = machine_name(index);
        self.attempt(|driver| driver.start(&name))
    }

    pub fn shutdown(&mut self, index: usize) -> StepResult {
        let name = machine_name(index);
        self.require(|driver| driver.shutdown(&name))
    }

    pub fn destroy(&mut self, index: usize) -> StepResult {
        let name = machine_name(index);
        self.require(|driver| driver.destroy(&name))
    }

    pub fn undefine(&mut self, index: usize) -> StepResult {
        let name = machine_name(index);
        self.require(|driver| driver.undefine(&name))
    }

    pub fn info(&self, index: usize) -> Result<MachineInfo, String> {
        self.driver()?
            .info(&machine_name(index))
            .map_err(|error| error.to_string())
    }

    pub fn is_tracked(&self, index: usize) -> Result<bool, String> {
        let name = machine_name(index);
        Ok(self.driver()?.list().contains(&name))
    }

    /// Waits for an asynchronous exit to leave the machine in `reason`.
    pub fn wait_for_shutoff(&self, index: usize, reason: ShutoffReason) -> StepResult {
        let expected = MachineState::Shutoff(reason);
        let name = machine_name(index);
        let driver = self.driver()?;
        wait_until(&format!("{name} to reach {expected}"), || {
            driver.state(&name).is_ok_and(|state| state == expected)
        })
    }

    /// Waits for the machine to leave the tracked set.
    pub fn wait_until_forgotten(&self, index: usize) -> StepResult {
        let name = machine_name(index);
        let driver = self.driver()?;
        wait_until(&format!("{name} to be forgotten"), || {
            !driver.list().contains(&name)
        })
    }

    pub fn lifecycle_of(&self, index: usize) -> Vec<LifecycleEvent> {
        self.reporter.lifecycle_of(&machine_name(index))
    }

    /// Launcher commands spawned for machine `index`.
    pub fn spawns_for(&self, index: usize) -> usize {
        let name = machine_name(index);
        self.launcher
            .commands()
            .iter()
            .filter(|command| command.args.last() == Some(&name))
            .count()
    }

    /// Stop tool invocations for machine `index`.
    pub fn stops_for(&self, index: usize) -> usize {
        let name = machine_name(index);
        self.launcher
            .stops()
            .iter()
            .filter(|stopped| **stopped == name)
            .count()
    }
}
