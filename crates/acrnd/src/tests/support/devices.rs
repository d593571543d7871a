//! In-memory host device backend.

use std::collections::BTreeSet;
use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8PathBuf;

use crate::resources::{HostDevices, Pty, ResourceError, TAP_PREFIX, TapRequest};

/// Host devices that only exist in memory.
///
/// Pseudo-terminal masters are handles on `/dev/null`, which is enough for
/// ownership and duplication checks.
#[derive(Clone, Default)]
pub struct FakeHostDevices {
    state: Arc<Mutex<DeviceState>>,
}

#[derive(Default)]
struct DeviceState {
    taps: BTreeSet<String>,
    created: usize,
    create_budget: Option<usize>,
    failing_deletes: u32,
    delete_attempts: u32,
    ptys_opened: u32,
}

impl FakeHostDevices {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state mutex poisoned")
    }

    /// Taps currently present, sorted.
    pub fn live_taps(&self) -> Vec<String> {
        self.state().taps.iter().cloned().collect()
    }

    /// Makes the next `count` deletions report a busy device.
    pub fn fail_deletes(&self, count: u32) {
        self.state().failing_deletes = count;
    }

    pub fn delete_attempts(&self) -> u32 {
        self.state().delete_attempts
    }

    /// Lets `count` more taps be created; later creations fail as if the
    /// bridge were missing.
    pub fn fail_tap_creation_after(&self, count: usize) {
        let mut state = self.state();
        state.create_budget = Some(state.created + count);
    }

    pub fn ptys_opened(&self) -> u32 {
        self.state().ptys_opened
    }
}

impl HostDevices for FakeHostDevices {
    fn create_tap(&self, request: &TapRequest<'_>) -> Result<String, ResourceError> {
        let mut state = self.state();
        if state
            .create_budget
            .is_some_and(|budget| state.created >= budget)
        {
            return Err(ResourceError::MissingBridge {
                bridge: request.bridge.to_owned(),
            });
        }
        let name = match request.name {
            Some(name) => name.to_owned(),
            None => (0..)
                .map(|index| format!("{TAP_PREFIX}{index}"))
                .find(|candidate| !state.taps.contains(candidate))
                .ok_or(ResourceError::NoFreeTapName)?,
        };
        state.taps.insert(name.clone());
        state.created += 1;
        Ok(name)
    }

    fn detach_tap(&self, _name: &str) -> Result<(), ResourceError> {
        Ok(())
    }

    fn delete_tap(&self, name: &str) -> Result<(), ResourceError> {
        let mut state = self.state();
        state.delete_attempts += 1;
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(ResourceError::ToolFailed {
                command: format!("ip tuntap del dev {name} mode tap"),
                device: name.to_owned(),
                stderr: "Device or resource busy".to_owned(),
            });
        }
        state.taps.remove(name);
        Ok(())
    }

    fn open_pty(&self) -> Result<Pty, ResourceError> {
        let master = File::open("/dev/null").map_err(|source| ResourceError::Pty { source })?;
        let mut state = self.state();
        let path = Utf8PathBuf::from(format!("/dev/pts/{}", state.ptys_opened));
        state.ptys_opened += 1;
        Ok(Pty {
            master: master.into(),
            path,
        })
    }
}
