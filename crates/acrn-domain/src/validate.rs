//! Post-parse checks applied before a definition is accepted.
//!
//! The parser collaborator produces structurally valid definitions; these
//! checks reject the combinations the launcher cannot express so callers
//! hear about them at define time rather than at the first start.

use crate::address::DeviceAddress;
use crate::definition::{DefinitionError, MachineDefinition};
use crate::device::{
    CharBackend, Console, ConsoleTarget, Controller, ControllerKind, Device, Disk, DiskBus,
    HostDevice, HostDeviceSource, NetworkBackend, NetworkInterface, SerialPort,
};

/// Highest serial port index the LPC bridge exposes (`com2`).
const MAX_SERIAL_PORT: u32 = 1;

/// Validates a definition.
///
/// # Errors
///
/// Returns the first [`DefinitionError`] encountered, in declared device
/// order after the machine-level checks.
pub fn validate(def: &MachineDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() || def.name.contains('\n') {
        return Err(DefinitionError::InvalidName {
            name: def.name.clone(),
        });
    }
    if def.memory_kib == 0 {
        return Err(DefinitionError::NoMemory {
            name: def.name.clone(),
        });
    }
    def.boot()?;

    for (position, device) in def.devices.iter().enumerate() {
        let reject = |reason: String| DefinitionError::UnsupportedDevice {
            device: device.kind().to_owned(),
            position,
            reason,
        };
        let outcome = match device {
            Device::Disk(disk) => check_disk(disk),
            Device::Network(net) => check_network(net),
            Device::HostDevice(hostdev) => check_hostdev(hostdev),
            Device::Controller(controller) => check_controller(controller),
            Device::Serial(serial) => check_serial(serial),
            Device::Console(console) => check_console(console),
            Device::Other { kind } => Err(format!("device type {kind} not supported")),
        };
        outcome.map_err(reject)?;
    }
    Ok(())
}

fn check_disk(disk: &Disk) -> Result<(), String> {
    match (disk.bus, &disk.address) {
        (DiskBus::Virtio, DeviceAddress::Pci(_) | DeviceAddress::None) => Ok(()),
        (DiskBus::Sata, DeviceAddress::Drive { .. }) => Ok(()),
        (bus, address) => Err(format!(
            "disk address type {} not supported on {bus:?} bus",
            address.kind()
        )),
    }
}

fn check_network(net: &NetworkInterface) -> Result<(), String> {
    match &net.backend {
        NetworkBackend::Bridge { bridge } if bridge.is_empty() => {
            Err("bridge name undefined".to_owned())
        }
        NetworkBackend::Ethernet if net.ifname.is_none() => Err("net dev undefined".to_owned()),
        _ => match net.address {
            DeviceAddress::Pci(_) | DeviceAddress::None => Ok(()),
            other => Err(format!("net address type {} not supported", other.kind())),
        },
    }
}

fn check_hostdev(hostdev: &HostDevice) -> Result<(), String> {
    match (hostdev.source, &hostdev.address) {
        (HostDeviceSource::Pci { .. }, DeviceAddress::None) => {
            Err("PCI hostdev has no valid address".to_owned())
        }
        (_, DeviceAddress::Pci(_) | DeviceAddress::None) => Ok(()),
        (_, other) => Err(format!(
            "hostdev address type {} not supported",
            other.kind()
        )),
    }
}

fn check_controller(controller: &Controller) -> Result<(), String> {
    match (controller.kind, &controller.address) {
        (ControllerKind::PciRoot, _) => Ok(()),
        (_, DeviceAddress::Pci(_) | DeviceAddress::None) => Ok(()),
        (_, other) => Err(format!(
            "controller address type {} not supported",
            other.kind()
        )),
    }
}

fn check_serial(serial: &SerialPort) -> Result<(), String> {
    if serial.port > MAX_SERIAL_PORT {
        return Err(format!("serial port {} not supported", serial.port));
    }
    match &serial.backend {
        CharBackend::Pty | CharBackend::Device { .. } | CharBackend::Stdio => Ok(()),
        CharBackend::Tcp { listen: true, .. } => Ok(()),
        CharBackend::Tcp { listen: false, .. } => {
            Err("serial over tcp must be in listen mode".to_owned())
        }
        other => Err(format!("serial type {} not supported", other.kind())),
    }
}

fn check_console(console: &Console) -> Result<(), String> {
    match console.target {
        ConsoleTarget::None | ConsoleTarget::Serial => Ok(()),
        ConsoleTarget::Virtio => {
            if matches!(console.backend, CharBackend::Tcp { .. }) {
                return Err("console type tcp not supported".to_owned());
            }
            match console.address {
                DeviceAddress::VirtioSerial { .. } | DeviceAddress::Pci(_) => Ok(()),
                other => Err(format!(
                    "virtio-console address type {} not supported",
                    other.kind()
                )),
            }
        }
    }
}
