//! The machine definition and its boot configuration.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::device::Device;

const fn default_vcpus() -> u32 {
    1
}

/// Firmware loader settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loader {
    /// Path to the firmware image.
    pub path: Utf8PathBuf,
    /// Explicit read-only flag; `None` leaves the launcher default.
    #[serde(default)]
    pub readonly: Option<bool>,
}

/// Raw operating-system boot settings as produced by the parser.
///
/// Exactly one of a firmware loader or a kernel (with its command line) is
/// expected; [`MachineDefinition::boot`] enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsConfig {
    /// Firmware loader.
    #[serde(default)]
    pub loader: Option<Loader>,
    /// Direct-boot kernel image.
    #[serde(default)]
    pub kernel: Option<Utf8PathBuf>,
    /// Kernel command line.
    #[serde(default)]
    pub cmdline: Option<String>,
    /// Initial ramdisk.
    #[serde(default)]
    pub initrd: Option<Utf8PathBuf>,
}

impl OsConfig {
    /// Boots through a firmware image.
    #[must_use]
    pub fn firmware(path: impl Into<Utf8PathBuf>, readonly: Option<bool>) -> Self {
        Self {
            loader: Some(Loader {
                path: path.into(),
                readonly,
            }),
            ..Self::default()
        }
    }

    /// Boots a kernel directly.
    #[must_use]
    pub fn kernel(
        kernel: impl Into<Utf8PathBuf>,
        cmdline: impl Into<String>,
        initrd: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            loader: None,
            kernel: Some(kernel.into()),
            cmdline: Some(cmdline.into()),
            initrd,
        }
    }
}

/// The resolved boot variant of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSpec<'a> {
    /// Boot through firmware.
    Firmware {
        /// Firmware image.
        path: &'a Utf8Path,
        /// Whether the launcher may write to the image.
        writable: bool,
    },
    /// Boot a kernel directly.
    Kernel {
        /// Kernel image.
        kernel: &'a Utf8Path,
        /// Kernel command line.
        cmdline: &'a str,
        /// Optional initial ramdisk.
        initrd: Option<&'a Utf8Path>,
    },
}

/// A parsed, immutable machine description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDefinition {
    /// Unique machine name.
    pub name: String,
    /// Unique machine identifier.
    pub uuid: Uuid,
    /// Initial memory in KiB.
    pub memory_kib: u64,
    /// Whether ACPI tables are exposed.
    #[serde(default)]
    pub acpi: bool,
    /// Number of virtual CPUs.
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    /// Host CPUs the vCPUs may run on; `None` means all host CPUs.
    #[serde(default)]
    pub cpu_affinity: Option<Vec<u32>>,
    /// Boot settings.
    pub os: OsConfig,
    /// Devices in declared order.
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl MachineDefinition {
    /// Builds a definition with one vCPU, ACPI off and no devices.
    #[must_use]
    pub fn new(name: impl Into<String>, uuid: Uuid, memory_kib: u64, os: OsConfig) -> Self {
        Self {
            name: name.into(),
            uuid,
            memory_kib,
            acpi: false,
            vcpus: default_vcpus(),
            cpu_affinity: None,
            os,
            devices: Vec::new(),
        }
    }

    /// Appends a device.
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    /// Sets the ACPI flag.
    #[must_use]
    pub const fn with_acpi(mut self, acpi: bool) -> Self {
        self.acpi = acpi;
        self
    }

    /// Sets the vCPU count.
    #[must_use]
    pub const fn with_vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = vcpus;
        self
    }

    /// Memory rounded up to whole MiB, as the launcher expects.
    #[must_use]
    pub const fn memory_mib(&self) -> u64 {
        self.memory_kib.div_ceil(1024)
    }

    /// Resolves the boot variant.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::AmbiguousBoot`] when both a loader and a
    /// kernel are present, and [`DefinitionError::MissingBoot`] when neither
    /// a loader nor a kernel with a command line is present.
    pub fn boot(&self) -> Result<BootSpec<'_>, DefinitionError> {
        let os = &self.os;
        match (&os.loader, &os.kernel) {
            (Some(_), Some(_)) => Err(DefinitionError::AmbiguousBoot {
                name: self.name.clone(),
            }),
            (Some(loader), None) => Ok(BootSpec::Firmware {
                path: &loader.path,
                writable: loader.readonly == Some(false),
            }),
            (None, Some(kernel)) => match &os.cmdline {
                Some(cmdline) => Ok(BootSpec::Kernel {
                    kernel,
                    cmdline,
                    initrd: os.initrd.as_deref(),
                }),
                None => Err(DefinitionError::MissingBoot {
                    name: self.name.clone(),
                }),
            },
            (None, None) => Err(DefinitionError::MissingBoot {
                name: self.name.clone(),
            }),
        }
    }
}

/// Reasons a definition is rejected before any host resource is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The machine name is empty or contains a newline.
    #[error("invalid machine name '{name}'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// The memory size is zero.
    #[error("machine '{name}' has no memory")]
    NoMemory {
        /// Machine name.
        name: String,
    },
    /// Both firmware and kernel boot are configured.
    #[error("machine '{name}' configures both a firmware loader and a kernel")]
    AmbiguousBoot {
        /// Machine name.
        name: String,
    },
    /// Neither boot variant is usable.
    #[error("machine '{name}' has no usable boot policy")]
    MissingBoot {
        /// Machine name.
        name: String,
    },
    /// A device is configured in a way the launcher cannot express.
    #[error("{device} device at position {position}: {reason}")]
    UnsupportedDevice {
        /// Device kind.
        device: String,
        /// Position in the declared device list.
        position: usize,
        /// What is wrong with it.
        reason: String,
    },
}
