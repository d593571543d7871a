//! Test doubles and worlds shared by unit and behavioural suites.

mod config_loader;
mod devices;
mod driver;
mod launcher;
mod lifecycle_world;
mod machines;
mod process_world;
mod reporter;
mod store;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use devices::FakeHostDevices;
pub use driver::{TEST_HOST_CPUS, open_test_driver};
pub use launcher::{FakeLauncher, controlled_process};
pub use lifecycle_world::{LifecycleTestWorld, machine_name};
pub use machines::{kernel_machine, networked_machine, pty_serial_machine};
pub use process_world::{ProcessTestWorld, StepResult, TestHostProvider, snapshot_status};
pub use reporter::{RecordedEvent, RecordingLifecycleReporter};
pub use store::MemoryDefinitionStore;
