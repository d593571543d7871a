//! Definitions used across suites.

use acrn_domain::{
    CharBackend, Device, DeviceAddress, MachineDefinition, NetworkBackend, NetworkInterface,
    OsConfig, PciAddress, SerialPort,
};
use uuid::Uuid;

/// Direct-kernel machine with 2 GiB and no devices.
pub fn kernel_machine(name: &str, uuid: u128) -> MachineDefinition {
    MachineDefinition::new(
        name,
        Uuid::from_u128(uuid),
        2 * 1024 * 1024,
        OsConfig::kernel("/boot/bzImage", "console=ttyS0", None),
    )
}

/// [`kernel_machine`] with a pty-backed first serial port.
pub fn pty_serial_machine(name: &str, uuid: u128) -> MachineDefinition {
    kernel_machine(name, uuid).with_device(Device::Serial(SerialPort {
        port: 0,
        backend: CharBackend::Pty,
    }))
}

/// [`pty_serial_machine`] with a NIC bridged to `virbr0`, so a run holds
/// one tap and one pty.
pub fn networked_machine(name: &str, uuid: u128) -> MachineDefinition {
    pty_serial_machine(name, uuid).with_device(Device::Network(NetworkInterface {
        backend: NetworkBackend::Bridge {
            bridge: "virbr0".to_owned(),
        },
        mac: "52:54:00:aa:bb:cc".parse().expect("valid mac"),
        ifname: None,
        address: DeviceAddress::Pci(PciAddress::new(0, 4, 0)),
    }))
}
