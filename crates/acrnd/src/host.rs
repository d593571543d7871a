//! Host CPU preparation.
//!
//! At startup every secondary host CPU is taken offline and handed to the
//! hypervisor. The CPU count is captured beforehand so node queries keep
//! reporting the full host.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::retry::{GaveUp, RetryPolicy};

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");

/// Host facts reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Host CPUs present at startup.
    pub cpus: u32,
}

/// Host CPU control through sysfs.
#[derive(Debug, Clone)]
pub struct HostCpus {
    sysfs_root: Utf8PathBuf,
    policy: RetryPolicy,
}

impl HostCpus {
    /// Builds a controller over `<sysfs_root>`.
    #[must_use]
    pub fn new(sysfs_root: impl Into<Utf8PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            policy,
        }
    }

    fn cpu_dir(&self) -> Utf8PathBuf {
        self.sysfs_root.join("devices/system/cpu")
    }

    fn offline_control(&self) -> Utf8PathBuf {
        self.sysfs_root.join("class/vhm/acrn_vhm/offline_cpu")
    }

    /// Counts the `cpuN` entries in the CPU directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be listed.
    pub fn count(&self) -> Result<u32, HostError> {
        let dir = self.cpu_dir();
        let entries = fs::read_dir(&dir).map_err(|source| HostError::ListCpus {
            path: dir.clone(),
            source,
        })?;
        let count = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_cpu_entry(name))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Takes CPUs `1..nprocs` offline and hands each to the hypervisor.
    ///
    /// # Errors
    ///
    /// Stops at the first CPU that cannot be offlined or handed over.
    pub fn offline_secondary(&self, nprocs: u32) -> Result<(), HostError> {
        for cpu in 1..nprocs {
            self.offline(cpu)?;
        }
        info!(
            target: HOST_TARGET,
            offlined = nprocs.saturating_sub(1),
            "secondary host CPUs handed to the hypervisor"
        );
        Ok(())
    }

    fn offline(&self, cpu: u32) -> Result<(), HostError> {
        let online = self.cpu_dir().join(format!("cpu{cpu}")).join("online");
        write_control(&online, "0")?;
        self.policy
            .run(|attempt| {
                let value = fs::read_to_string(&online).map_err(|source| HostError::Read {
                    path: online.clone(),
                    source,
                })?;
                if value.trim() == "0" {
                    Ok(())
                } else {
                    debug!(target: HOST_TARGET, cpu, attempt, "cpu still online");
                    Err(HostError::StillOnline { cpu })
                }
            })
            .map_err(|GaveUp { last_error, .. }| last_error)?;
        write_control(&self.offline_control(), &cpu.to_string())?;
        debug!(target: HOST_TARGET, cpu, "cpu offlined");
        Ok(())
    }
}

fn is_cpu_entry(name: &str) -> bool {
    name.strip_prefix("cpu")
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

fn write_control(path: &Utf8Path, value: &str) -> Result<(), HostError> {
    fs::write(path, value).map_err(|source| HostError::Write {
        path: path.to_owned(),
        source,
    })
}

/// Errors raised while preparing host CPUs.
#[derive(Debug, Error)]
pub enum HostError {
    /// The CPU directory could not be listed.
    #[error("failed to list cpus in '{path}': {source}")]
    ListCpus {
        /// Directory.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A control file could not be written.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// Control file.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A control file could not be read back.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// Control file.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The CPU never read back as offline.
    #[error("cpu{cpu} did not go offline")]
    StillOnline {
        /// CPU index.
        cpu: u32,
    },
}
