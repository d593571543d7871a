//! Launcher command synthesis.
//!
//! The launcher enumerates guest devices in argument order, so the output is
//! fully determined by the definition's declared device order and the
//! addresses the parsing collaborator assigned. Devices needing a host-side
//! resource allocate it here; every allocation is recorded in the machine's
//! [`MachineResources`] so a failed start can release exactly what this
//! attempt created.

use std::collections::HashSet;

use acrn_domain::{
    BootSpec, CharBackend, Console, ConsoleTarget, Controller, ControllerKind, DefinitionError,
    Device, DeviceAddress, Disk, DiskBus, DiskDevice, HostDevice, HostDeviceSource,
    MachineDefinition, NetworkBackend, NetworkInterface, PciAddress, SerialPort,
};
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::resources::{
    HostDevices, MachineResources, ResourceError, TapRecord, create_network_tap,
};

/// Fixed platform bridge every machine gets first.
const HOSTBRIDGE: &str = "0:0,hostbridge";

/// ISA bridge hosting the legacy serial ports.
const LPC_BRIDGE: &str = "1:0,lpc";

/// A synthesised launcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Launcher executable.
    pub program: Utf8PathBuf,
    /// Arguments in launcher order.
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Renders the command for logs.
    #[must_use]
    pub fn display(&self) -> String {
        let mut rendered = self.program.to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Host-facing collaborators available while synthesising.
pub struct SynthesisContext<'a> {
    /// Creates taps and pseudo-terminals.
    pub devices: &'a dyn HostDevices,
    /// Receives every resource allocated during synthesis.
    pub resources: &'a mut MachineResources,
    /// Capacity identifier assigned to this run, if any.
    pub capacity_id: Option<Uuid>,
}

/// Builds the launcher command for `def`.
///
/// # Errors
///
/// Fails on the first device that cannot be expressed or whose resource
/// cannot be allocated. Resources allocated before the failure remain
/// recorded in `ctx.resources` for the caller to release.
pub fn synthesize(
    launcher: &Utf8Path,
    def: &MachineDefinition,
    ctx: &mut SynthesisContext<'_>,
) -> Result<LaunchCommand, SynthesisError> {
    let boot = def.boot()?;
    let mut builder = CommandBuilder::new(def);

    if def.acpi {
        builder.push("-A");
    }
    builder.push("-m");
    builder.push(format!("{}M", def.memory_mib()));
    if let Some(id) = ctx.capacity_id {
        builder.push("-U");
        builder.push(id.to_string());
    }
    builder.slot(HOSTBRIDGE);

    for (position, device) in def.devices.iter().enumerate() {
        builder.device(position, device, ctx)?;
    }

    match boot {
        BootSpec::Firmware { path, writable } => {
            builder.push("--ovmf");
            if writable {
                builder.push(format!("w,{path}"));
            } else {
                builder.push(path.as_str());
            }
        }
        BootSpec::Kernel {
            kernel,
            cmdline,
            initrd,
        } => {
            builder.push("-k");
            builder.push(kernel.as_str());
            builder.push("-B");
            builder.push(cmdline);
            if let Some(initrd) = initrd {
                builder.push("-r");
                builder.push(initrd.as_str());
            }
        }
    }
    builder.push(def.name.as_str());

    Ok(LaunchCommand {
        program: launcher.to_owned(),
        args: builder.args,
    })
}

struct CommandBuilder<'d> {
    def: &'d MachineDefinition,
    args: Vec<String>,
    sata_in_use: HashSet<u32>,
    lpc_emitted: bool,
}

impl<'d> CommandBuilder<'d> {
    fn new(def: &'d MachineDefinition) -> Self {
        Self {
            def,
            args: Vec::new(),
            sata_in_use: HashSet::new(),
            lpc_emitted: false,
        }
    }

    fn push(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    fn slot(&mut self, group: impl Into<String>) {
        self.push("-s");
        self.push(group);
    }

    fn device(
        &mut self,
        position: usize,
        device: &Device,
        ctx: &mut SynthesisContext<'_>,
    ) -> Result<(), SynthesisError> {
        match device {
            Device::Disk(disk) => self.disk(position, disk),
            Device::Network(net) => self.network(position, net, ctx),
            Device::HostDevice(hostdev) => self.hostdev(position, hostdev),
            Device::Controller(controller) => self.controller(position, controller),
            Device::Serial(serial) => self.serial(serial, ctx),
            Device::Console(console) => self.console(position, console),
            Device::Other { kind } => Err(SynthesisError::UnsupportedDevice { kind: kind.clone() }),
        }
    }

    fn disk(&mut self, position: usize, disk: &Disk) -> Result<(), SynthesisError> {
        match disk.bus {
            DiskBus::Virtio => {
                let address = require_pci(&disk.address, "disk", position)?;
                self.slot(format!("{address},virtio-blk,{}", disk.source));
            }
            DiskBus::Sata => {
                let DeviceAddress::Drive { controller, .. } = disk.address else {
                    return Err(SynthesisError::MissingAddress {
                        device: "disk",
                        position,
                    });
                };
                let address = self.sata_controller(controller)?;
                if !self.sata_in_use.insert(controller) {
                    return Err(SynthesisError::SataControllerInUse { index: controller });
                }
                let media = match disk.device {
                    DiskDevice::Disk => "hd",
                    DiskDevice::Cdrom => "cd",
                };
                self.slot(format!("{address},ahci-{media},{}", disk.source));
            }
        }
        Ok(())
    }

    fn sata_controller(&self, index: u32) -> Result<PciAddress, SynthesisError> {
        self.def
            .devices
            .iter()
            .find_map(|device| match device {
                Device::Controller(Controller {
                    kind: ControllerKind::Sata,
                    index: candidate,
                    address,
                }) if *candidate == index => address.pci(),
                _ => None,
            })
            .ok_or(SynthesisError::SataControllerMissing { index })
    }

    fn network(
        &mut self,
        position: usize,
        net: &NetworkInterface,
        ctx: &mut SynthesisContext<'_>,
    ) -> Result<(), SynthesisError> {
        let address = require_pci(&net.address, "interface", position)?;
        let ifname = match &net.backend {
            NetworkBackend::Bridge { bridge } => {
                let tap = create_network_tap(
                    ctx.devices,
                    net.ifname.as_deref(),
                    bridge,
                    net.mac,
                    self.def.uuid,
                )?;
                ctx.resources.record_tap(TapRecord {
                    name: tap.clone(),
                    bridge: bridge.clone(),
                });
                tap
            }
            NetworkBackend::Ethernet => net
                .ifname
                .clone()
                .ok_or(SynthesisError::MissingInterfaceName { position })?,
        };
        self.slot(format!("{address},virtio-net,{ifname},mac={}", net.mac));
        Ok(())
    }

    fn hostdev(&mut self, position: usize, hostdev: &HostDevice) -> Result<(), SynthesisError> {
        let address = require_pci(&hostdev.address, "hostdev", position)?;
        let source = match hostdev.source {
            HostDeviceSource::Usb { host: Some(usb) } => format!("{:x}/{:x}/0", usb.bus, usb.device),
            HostDeviceSource::Usb { host: None } => {
                return Err(SynthesisError::MissingHostAddress { position });
            }
            HostDeviceSource::Pci { host } => {
                format!("{:x}/{:x}/{:x}", host.bus, host.slot, host.function)
            }
        };
        self.slot(format!("{address},passthru,{source}"));
        Ok(())
    }

    fn controller(&mut self, position: usize, controller: &Controller) -> Result<(), SynthesisError> {
        if controller.kind != ControllerKind::VirtioSerial {
            return Ok(());
        }
        let consoles = self
            .def
            .devices
            .iter()
            .filter_map(|device| match device {
                Device::Console(
                    console @ Console {
                        target: ConsoleTarget::Virtio,
                        address: DeviceAddress::VirtioSerial { controller: index, .. },
                        ..
                    },
                ) if *index == controller.index => Some(console),
                _ => None,
            })
            .collect::<Vec<_>>();
        if consoles.is_empty() {
            return Ok(());
        }
        let address = require_pci(&controller.address, "controller", position)?;
        let mut group = format!("{address},virtio-console");
        for console in consoles {
            group.push_str(&console_clause(&console.backend)?);
        }
        self.slot(group);
        Ok(())
    }

    fn serial(
        &mut self,
        serial: &SerialPort,
        ctx: &mut SynthesisContext<'_>,
    ) -> Result<(), SynthesisError> {
        if !self.lpc_emitted {
            self.slot(LPC_BRIDGE);
            self.lpc_emitted = true;
        }
        let backend = match &serial.backend {
            CharBackend::Pty => {
                let registry = ctx.resources.ptys_mut();
                registry.ensure_capacity()?;
                let pty = ctx.devices.open_pty()?;
                registry.push(serial.port, pty)?.into_string()
            }
            CharBackend::Device { path } => path.to_string(),
            CharBackend::Stdio => "stdio".to_owned(),
            CharBackend::Tcp { service, .. } => {
                let port = service
                    .parse::<u32>()
                    .map_err(|_| SynthesisError::InvalidTcpPort {
                        service: service.clone(),
                    })?;
                format!("tcp:{port}")
            }
            other => {
                return Err(SynthesisError::UnsupportedBackend {
                    device: "serial",
                    backend: other.kind(),
                });
            }
        };
        self.push("-l");
        self.push(format!("com{},{backend}", serial.port + 1));
        Ok(())
    }

    fn console(&mut self, position: usize, console: &Console) -> Result<(), SynthesisError> {
        match (console.target, &console.address) {
            // Implicit consoles restate a serial port already handled.
            (ConsoleTarget::None | ConsoleTarget::Serial, _) => Ok(()),
            // Emitted with the owning controller.
            (ConsoleTarget::Virtio, DeviceAddress::VirtioSerial { .. }) => Ok(()),
            (ConsoleTarget::Virtio, DeviceAddress::Pci(address)) => {
                let mut group = format!("{address},virtio-console");
                group.push_str(&console_clause(&console.backend)?);
                self.slot(group);
                Ok(())
            }
            (ConsoleTarget::Virtio, _) => Err(SynthesisError::MissingAddress {
                device: "console",
                position,
            }),
        }
    }
}

fn require_pci(
    address: &DeviceAddress,
    device: &'static str,
    position: usize,
) -> Result<PciAddress, SynthesisError> {
    address
        .pci()
        .ok_or(SynthesisError::MissingAddress { device, position })
}

fn console_clause(backend: &CharBackend) -> Result<String, SynthesisError> {
    let clause = match backend {
        CharBackend::Pty => ",@pty:pty_port".to_owned(),
        CharBackend::Device { path } => format!(",@tty:tty_port={path}"),
        CharBackend::File { path } => format!(",@file:file_port={path}"),
        CharBackend::Stdio => ",@stdio:stdio_port".to_owned(),
        CharBackend::Unix { path, listen } => format!(
            ",socket:socket_file_name={path}:{}",
            if *listen { "server" } else { "client" }
        ),
        CharBackend::Tcp { .. } => {
            return Err(SynthesisError::UnsupportedBackend {
                device: "console",
                backend: backend.kind(),
            });
        }
    };
    Ok(clause)
}

/// Errors raised while synthesising a launcher command.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The definition itself is unusable.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    /// A device kind the launcher cannot express.
    #[error("device type {kind} not supported")]
    UnsupportedDevice {
        /// Device kind.
        kind: String,
    },
    /// A character backend the device cannot use.
    #[error("{device} type {backend} not supported")]
    UnsupportedBackend {
        /// Device kind.
        device: &'static str,
        /// Backend kind.
        backend: &'static str,
    },
    /// A device lacks the guest address it needs.
    #[error("{device} at position {position} has no usable address")]
    MissingAddress {
        /// Device kind.
        device: &'static str,
        /// Position in declared order.
        position: usize,
    },
    /// A USB passthrough device has no resolved host address.
    #[error("usb hostdev at position {position} has no host address")]
    MissingHostAddress {
        /// Position in declared order.
        position: usize,
    },
    /// An ethernet interface has no host interface name.
    #[error("interface at position {position} has no host device name")]
    MissingInterfaceName {
        /// Position in declared order.
        position: usize,
    },
    /// A SATA disk references a controller that does not exist.
    #[error("no SATA controller with index {index}")]
    SataControllerMissing {
        /// Referenced controller index.
        index: u32,
    },
    /// A SATA controller already carries a disk.
    #[error("SATA controller {index} already has a disk attached")]
    SataControllerInUse {
        /// Controller index.
        index: u32,
    },
    /// A serial TCP service is not a port number.
    #[error("serial over tcp: invalid port '{service}'")]
    InvalidTcpPort {
        /// Configured service string.
        service: String,
    },
    /// Allocating a host resource failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl SynthesisError {
    /// Whether the failure is a host resource ceiling rather than a
    /// configuration or host tool problem.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::Resource(ResourceError::TooManyChannels { .. } | ResourceError::NoFreeTapName)
        )
    }

    /// Whether the failure came from running a host tool.
    #[must_use]
    pub const fn is_host_failure(&self) -> bool {
        matches!(self, Self::Resource(_)) && !self.is_exhaustion()
    }
}
