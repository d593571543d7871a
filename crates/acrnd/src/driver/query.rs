//! Read-only machine and host queries.

use std::os::fd::OwnedFd;
use std::time::{SystemTime, UNIX_EPOCH};

use acrn_domain::{CharBackend, Device, MachineState};
use camino::Utf8PathBuf;

use super::machine::MachineRecord;
use super::{Driver, DriverError};
use crate::host::NodeInfo;
use crate::launcher::{INACTIVE_ID, numeric_id};

/// Summary of one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    /// Current state.
    pub state: MachineState,
    /// Memory in KiB.
    pub memory_kib: u64,
    /// Virtual CPU count.
    pub vcpus: u32,
    /// Numeric identity; [`INACTIVE_ID`] when not running.
    pub id: i32,
    /// Guest-visible pseudo-terminal paths.
    pub consoles: Vec<Utf8PathBuf>,
}

/// Placement of one virtual CPU.
///
/// The launcher exposes no placement or accounting, so this is an
/// approximation: vCPUs are spread round-robin over the allowed host CPUs
/// and the CPU time is derived from the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcpuInfo {
    /// Virtual CPU index.
    pub number: u32,
    /// Host CPU it is reported on.
    pub host_cpu: u32,
    /// Reported CPU time in nanoseconds.
    pub cpu_time: u64,
}

impl Driver {
    /// Current state of a machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown machines.
    pub fn state(&self, name: &str) -> Result<MachineState, DriverError> {
        self.inner.with_machine(name, |record| Ok(record.state))
    }

    /// Summary of a machine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] for unknown machines.
    pub fn info(&self, name: &str) -> Result<MachineInfo, DriverError> {
        self.inner.with_machine(name, |record| {
            let active = record.state.is_active();
            Ok(MachineInfo {
                state: record.state,
                memory_kib: record.def.memory_kib,
                vcpus: record.def.vcpus,
                id: if active {
                    numeric_id(record.name())
                } else {
                    INACTIVE_ID
                },
                consoles: record
                    .resources
                    .ptys()
                    .paths()
                    .map(ToOwned::to_owned)
                    .collect(),
            })
        })
    }

    /// Approximate vCPU placement of a running machine.
    ///
    /// # Errors
    ///
    /// Fails for unknown or shut-off machines.
    pub fn vcpu_info(&self, name: &str) -> Result<Vec<VcpuInfo>, DriverError> {
        let host_cpus = self.inner.node.cpus;
        self.inner.with_machine(name, |record| {
            require_running(record, "query vCPUs of")?;
            let allowed = record
                .def
                .cpu_affinity
                .clone()
                .filter(|cpus| !cpus.is_empty())
                .unwrap_or_else(|| (0..host_cpus.max(1)).collect());
            let cpu_time = approximate_cpu_time();
            Ok((0..record.def.vcpus)
                .zip(allowed.iter().copied().cycle())
                .map(|(number, host_cpu)| VcpuInfo {
                    number,
                    host_cpu,
                    cpu_time,
                })
                .collect())
        })
    }

    /// Pretty-printed JSON description of a machine's live definition.
    ///
    /// # Errors
    ///
    /// Fails for unknown machines or when encoding fails.
    pub fn describe(&self, name: &str) -> Result<String, DriverError> {
        self.inner.with_machine(name, |record| {
            serde_json::to_string_pretty(&record.def).map_err(|source| DriverError::Describe {
                name: name.to_owned(),
                source,
            })
        })
    }

    /// Duplicates the master end of the machine's first pty serial port.
    ///
    /// # Errors
    ///
    /// Fails for unknown or shut-off machines, machines without a pty
    /// serial port, and when the descriptor cannot be duplicated.
    pub fn open_console(&self, name: &str) -> Result<OwnedFd, DriverError> {
        self.inner.with_machine(name, |record| {
            require_running(record, "open the console of")?;
            let ptys = record.resources.ptys();
            let master = record
                .def
                .devices
                .iter()
                .find_map(|device| match device {
                    Device::Serial(serial) if serial.backend == CharBackend::Pty => {
                        ptys.master_for(serial.port)
                    }
                    _ => None,
                })
                .ok_or_else(|| DriverError::NoConsole {
                    name: name.to_owned(),
                })?;
            master
                .try_clone_to_owned()
                .map_err(|source| DriverError::Console {
                    name: name.to_owned(),
                    source,
                })
        })
    }

    /// Names of all tracked machines, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.inner.table().names()
    }

    /// Launcher version as `major * 1_000_000 + minor * 1_000 + micro`.
    ///
    /// # Errors
    ///
    /// Fails when the launcher cannot be queried.
    pub fn version(&self) -> Result<u64, DriverError> {
        self.inner
            .launcher
            .version()
            .map_err(|source| DriverError::Launcher { source })
    }

    /// Host facts captured at startup.
    #[must_use]
    pub fn node_info(&self) -> NodeInfo {
        self.inner.node
    }
}

fn require_running(record: &MachineRecord, operation: &'static str) -> Result<(), DriverError> {
    if record.state.is_active() {
        Ok(())
    } else {
        Err(DriverError::InvalidState {
            name: record.name().to_owned(),
            operation,
            state: record.state,
        })
    }
}

/// Wall-clock microseconds divided by ten.
fn approximate_cpu_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_micros() / 10).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
