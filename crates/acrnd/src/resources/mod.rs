//! Host-side resources consumed by running machines.
//!
//! Three kinds of resource are tracked: tap devices bridging guest NICs to
//! host bridges, pseudo-terminals backing guest serial ports, and capacity
//! identifiers from a fixed pool. Creation goes through the [`HostDevices`]
//! seam so the lifecycle logic can run against fakes; the bookkeeping types
//! here are plain data guarded by the owning machine's lock.

mod capacity;
mod pty;
mod system;
mod tap;

use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use acrn_domain::MacAddress;
use camino::Utf8PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub use capacity::{CapacityExhausted, CapacityPool, InvalidCapacityId};
pub use pty::{MAX_PTYS, PtyRegistry};
pub use system::SystemHostDevices;
pub use tap::{TAP_PREFIX, create_network_tap, destroy_network_taps};

pub(crate) const RESOURCE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resources");

/// Parameters for creating one tap device.
#[derive(Debug, Clone, Copy)]
pub struct TapRequest<'a> {
    /// Name to reuse, already checked to carry the generated prefix.
    pub name: Option<&'a str>,
    /// Bridge the tap is enslaved to.
    pub bridge: &'a str,
    /// Guest MAC address; the host side derives its own address from it.
    pub mac: MacAddress,
    /// Machine the tap belongs to.
    pub owner: Uuid,
}

/// A freshly opened pseudo-terminal.
///
/// The master end stays with the supervisor; the launcher opens `path`.
#[derive(Debug)]
pub struct Pty {
    /// Master end, kept open for console access.
    pub master: OwnedFd,
    /// Path of the slave device handed to the launcher.
    pub path: Utf8PathBuf,
}

/// Operations on host devices the supervisor creates for machines.
pub trait HostDevices: Send + Sync {
    /// Creates, addresses, enslaves and brings up a tap device.
    ///
    /// Each call is atomic: on failure no device created by this call
    /// remains.
    fn create_tap(&self, request: &TapRequest<'_>) -> Result<String, ResourceError>;

    /// Detaches a tap from its bridge.
    fn detach_tap(&self, name: &str) -> Result<(), ResourceError>;

    /// Deletes a tap device.
    fn delete_tap(&self, name: &str) -> Result<(), ResourceError>;

    /// Opens a new pseudo-terminal pair.
    fn open_pty(&self) -> Result<Pty, ResourceError>;
}

impl<T> HostDevices for Arc<T>
where
    T: HostDevices + ?Sized,
{
    fn create_tap(&self, request: &TapRequest<'_>) -> Result<String, ResourceError> {
        (**self).create_tap(request)
    }

    fn detach_tap(&self, name: &str) -> Result<(), ResourceError> {
        (**self).detach_tap(name)
    }

    fn delete_tap(&self, name: &str) -> Result<(), ResourceError> {
        (**self).delete_tap(name)
    }

    fn open_pty(&self) -> Result<Pty, ResourceError> {
        (**self).open_pty()
    }
}

/// A tap created for a machine's bridge-backed interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapRecord {
    /// Tap device name.
    pub name: String,
    /// Bridge it was enslaved to.
    pub bridge: String,
}

/// Resources held on behalf of one machine.
#[derive(Debug, Default)]
pub struct MachineResources {
    taps: Vec<TapRecord>,
    ptys: PtyRegistry,
}

impl MachineResources {
    /// Records a tap created for this machine.
    pub fn record_tap(&mut self, tap: TapRecord) {
        self.taps.push(tap);
    }

    /// Taps still recorded against the machine.
    #[must_use]
    pub fn taps(&self) -> &[TapRecord] {
        &self.taps
    }

    pub(crate) fn take_taps(&mut self) -> Vec<TapRecord> {
        std::mem::take(&mut self.taps)
    }

    /// The machine's pseudo-terminal registry.
    #[must_use]
    pub const fn ptys(&self) -> &PtyRegistry {
        &self.ptys
    }

    /// Mutable access to the pseudo-terminal registry.
    pub const fn ptys_mut(&mut self) -> &mut PtyRegistry {
        &mut self.ptys
    }

    /// Whether nothing is held.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.taps.is_empty() && self.ptys.is_empty()
    }
}

/// Errors raised while creating or releasing host resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The machine's pseudo-terminal registry is full.
    #[error("too many ttys (max = {max})")]
    TooManyChannels {
        /// Registry capacity.
        max: usize,
    },
    /// The bridge a tap should join does not exist.
    #[error("bridge '{bridge}' does not exist")]
    MissingBridge {
        /// Requested bridge.
        bridge: String,
    },
    /// No unused tap name could be found.
    #[error("no free tap device name")]
    NoFreeTapName,
    /// Listing host network interfaces failed.
    #[error("failed to list network interfaces in '{path}': {source}")]
    ListInterfaces {
        /// Directory that was read.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A network tool invocation could not be run.
    #[error("failed to run '{program}' for {device}: {source}")]
    ToolSpawn {
        /// Tool executable.
        program: String,
        /// Device being configured.
        device: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A network tool invocation reported failure.
    #[error("'{command}' failed for {device}: {stderr}")]
    ToolFailed {
        /// Rendered command line.
        command: String,
        /// Device being configured.
        device: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Opening a pseudo-terminal failed.
    #[error("failed to open pseudo-terminal: {source}")]
    Pty {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The pseudo-terminal slave path was not valid UTF-8.
    #[error("pseudo-terminal path is not valid UTF-8")]
    PtyPath,
}

#[cfg(test)]
mod tests;
