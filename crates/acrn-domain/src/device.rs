//! Device entries of a machine definition.
//!
//! [`Device`] is a closed tagged union. Kinds the launcher cannot express are
//! carried as [`Device::Other`] so command synthesis can reject them by name
//! instead of dropping them.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::address::{DeviceAddress, PciAddress, UsbAddress};
use crate::mac::MacAddress;

/// One device attached to a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum Device {
    /// A block device.
    Disk(Disk),
    /// A virtual network interface.
    Network(NetworkInterface),
    /// A host device passed through to the guest.
    HostDevice(HostDevice),
    /// A bus or port controller.
    Controller(Controller),
    /// A legacy serial port.
    Serial(SerialPort),
    /// A console channel.
    Console(Console),
    /// Any device kind the supervisor does not model.
    Other {
        /// Kind reported by the parser, e.g. `watchdog`.
        kind: String,
    },
}

impl Device {
    /// Short kind name used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Disk(_) => "disk",
            Self::Network(_) => "interface",
            Self::HostDevice(_) => "hostdev",
            Self::Controller(_) => "controller",
            Self::Serial(_) => "serial",
            Self::Console(_) => "console",
            Self::Other { kind } => kind,
        }
    }
}

/// Bus a disk is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskBus {
    /// Paravirtual block device on its own PCI slot.
    Virtio,
    /// AHCI drive behind a SATA controller.
    Sata,
}

/// Media presented by a disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskDevice {
    /// Read-write hard disk.
    #[default]
    Disk,
    /// Optical drive.
    Cdrom,
}

/// A file-backed block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Attachment bus.
    pub bus: DiskBus,
    /// Media kind.
    #[serde(default)]
    pub device: DiskDevice,
    /// Backing file on the host.
    pub source: Utf8PathBuf,
    /// Guest address; PCI for virtio, a drive slot for SATA.
    #[serde(default)]
    pub address: DeviceAddress,
}

/// Host side of a network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkBackend {
    /// A tap device created by the supervisor and enslaved to a bridge.
    Bridge {
        /// Name of the host bridge.
        bridge: String,
    },
    /// A pre-existing host interface named by `ifname`.
    Ethernet,
}

/// A virtio network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Host-side backend.
    pub backend: NetworkBackend,
    /// Guest MAC address.
    pub mac: MacAddress,
    /// Requested host interface name, if any.
    #[serde(default)]
    pub ifname: Option<String>,
    /// Guest PCI address.
    #[serde(default)]
    pub address: DeviceAddress,
}

/// Where a passthrough device lives on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostDeviceSource {
    /// A USB device; the host address is resolved by the attach collaborator.
    Usb {
        /// Resolved host bus/device, when known.
        #[serde(default)]
        host: Option<UsbAddress>,
    },
    /// A PCI function.
    Pci {
        /// Host PCI address.
        host: PciAddress,
    },
}

/// A host device passed through to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDevice {
    /// Host location.
    pub source: HostDeviceSource,
    /// Guest PCI address.
    #[serde(default)]
    pub address: DeviceAddress,
}

/// Controller kinds the launcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    /// The implicit PCI root; never emitted.
    PciRoot,
    /// AHCI controller hosting SATA drives.
    Sata,
    /// Multiplexer for virtio consoles.
    VirtioSerial,
}

/// A controller device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    /// Controller kind.
    pub kind: ControllerKind,
    /// Index referenced by child devices.
    pub index: u32,
    /// Guest PCI address.
    #[serde(default)]
    pub address: DeviceAddress,
}

/// Host backend of a character channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CharBackend {
    /// A pseudo-terminal allocated on the host.
    Pty,
    /// An existing character device.
    Device {
        /// Device node path.
        path: Utf8PathBuf,
    },
    /// A plain output file.
    File {
        /// File path.
        path: Utf8PathBuf,
    },
    /// The launcher's standard I/O.
    Stdio,
    /// A Unix domain socket.
    Unix {
        /// Socket path.
        path: Utf8PathBuf,
        /// Whether the launcher listens (server) or connects (client).
        listen: bool,
    },
    /// A TCP socket.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port, as written by the operator.
        service: String,
        /// Whether the launcher listens.
        listen: bool,
    },
}

impl CharBackend {
    /// Short kind name used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Device { .. } => "dev",
            Self::File { .. } => "file",
            Self::Stdio => "stdio",
            Self::Unix { .. } => "unix",
            Self::Tcp { .. } => "tcp",
        }
    }
}

/// A legacy serial port exposed through the LPC bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPort {
    /// Port index; `0` maps to `com1`.
    pub port: u32,
    /// Host backend.
    pub backend: CharBackend,
}

/// What a console is bound to inside the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleTarget {
    /// No distinct target; mirrors another device.
    None,
    /// Restates the first serial port.
    Serial,
    /// A virtio console port.
    Virtio,
}

/// A console channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Console {
    /// Guest-side binding.
    pub target: ConsoleTarget,
    /// Host backend.
    pub backend: CharBackend,
    /// Virtio-serial port or standalone PCI address.
    #[serde(default)]
    pub address: DeviceAddress,
}
