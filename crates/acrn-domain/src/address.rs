//! Guest and host addressing carried by devices.
//!
//! Addresses are assigned by the parsing collaborator before a command line
//! is synthesised. The supervisor copies them verbatim into launcher
//! arguments and never reassigns them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A PCI location expressed as bus, slot and function.
///
/// Guest addresses display in the launcher's decimal `bus:slot:func` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PciAddress {
    /// PCI bus number.
    pub bus: u8,
    /// Slot on the bus.
    pub slot: u8,
    /// Function within the slot.
    pub function: u8,
}

impl PciAddress {
    /// Builds an address from its components.
    #[must_use]
    pub const fn new(bus: u8, slot: u8, function: u8) -> Self {
        Self {
            bus,
            slot,
            function,
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bus, self.slot, self.function)
    }
}

/// Host USB location of a passthrough device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbAddress {
    /// Host USB bus number.
    pub bus: u32,
    /// Device number on the bus.
    pub device: u32,
}

/// Guest-visible placement of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceAddress {
    /// No address has been assigned.
    #[default]
    None,
    /// Directly on the guest PCI bus.
    Pci(PciAddress),
    /// A drive slot on a disk controller.
    Drive {
        /// Index of the owning controller.
        controller: u32,
        /// Unit on the controller.
        unit: u32,
    },
    /// A port on a virtio-serial controller.
    VirtioSerial {
        /// Index of the owning controller.
        controller: u32,
        /// Port on the controller.
        port: u32,
    },
}

impl DeviceAddress {
    /// Returns the PCI address when the device sits directly on the bus.
    #[must_use]
    pub const fn pci(&self) -> Option<PciAddress> {
        match self {
            Self::Pci(address) => Some(*address),
            _ => None,
        }
    }

    /// Short name of the address kind, used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pci(_) => "pci",
            Self::Drive { .. } => "drive",
            Self::VirtioSerial { .. } => "virtio-serial",
        }
    }
}
