//! Driver construction over test doubles.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::driver::{Driver, DriverDeps, DriverSettings};
use crate::host::NodeInfo;
use crate::launcher::ProcessLauncher;
use crate::lifecycle::LifecycleReporter;
use crate::resources::{CapacityPool, HostDevices};
use crate::retry::RetryPolicy;
use crate::store::DefinitionStore;

/// Host CPU count reported by test drivers.
pub const TEST_HOST_CPUS: u32 = 4;

/// Settings with `capacity` pool identifiers and an immediate tap retry.
fn test_settings(capacity: usize) -> DriverSettings {
    let ids = (0xcafe_0000_u128..)
        .take(capacity)
        .map(Uuid::from_u128)
        .collect();
    DriverSettings {
        launcher_path: "/usr/bin/acrn-dm".into(),
        capacity: CapacityPool::new(ids),
        tap_retry: RetryPolicy::new(3, Duration::ZERO),
    }
}

/// Opens a driver over the supplied collaborators.
pub fn open_test_driver(
    capacity: usize,
    launcher: Arc<dyn ProcessLauncher>,
    devices: Arc<dyn HostDevices>,
    store: Arc<dyn DefinitionStore>,
    reporter: Arc<dyn LifecycleReporter>,
) -> Driver {
    Driver::open(DriverDeps {
        settings: test_settings(capacity),
        launcher,
        devices,
        store,
        reporter,
        node: NodeInfo {
            cpus: TEST_HOST_CPUS,
        },
    })
    .expect("driver should open")
}
