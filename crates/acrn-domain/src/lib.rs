//! Structured machine definitions consumed by the ACRN supervisor.
//!
//! The parsing collaborator turns an operator-supplied description into a
//! [`MachineDefinition`]: identity, memory, boot configuration and an ordered
//! list of [`Device`] entries whose guest addresses have already been
//! assigned. The supervisor treats a definition as immutable once parsed; the
//! types here carry no behaviour beyond formatting, parsing of small value
//! types and the post-parse checks in [`validate`].
//!
//! Runtime state shared between the supervisor and its event sinks lives in
//! [`state`].

pub mod address;
pub mod definition;
pub mod device;
pub mod mac;
pub mod state;
pub mod validate;

pub use self::address::{DeviceAddress, PciAddress, UsbAddress};
pub use self::definition::{BootSpec, DefinitionError, Loader, MachineDefinition, OsConfig};
pub use self::device::{
    CharBackend, Console, ConsoleTarget, Controller, ControllerKind, Device, Disk, DiskBus,
    DiskDevice, HostDevice, HostDeviceSource, NetworkBackend, NetworkInterface, SerialPort,
};
pub use self::mac::{MacAddress, MacAddressParseError};
pub use self::state::{MachineState, RunningReason, ShutoffReason};
pub use self::validate::validate;
