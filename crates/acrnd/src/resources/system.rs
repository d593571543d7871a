//! Host device backend driving `ip` and `/dev/ptmx`.

use std::fs;
use std::io;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::process::Command;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use tracing::{debug, warn};

use super::{HostDevices, Pty, RESOURCE_TARGET, ResourceError, TAP_PREFIX, TapRequest};

/// Linux interface names are limited to `IFNAMSIZ - 1` bytes.
const MAX_IFNAME_LEN: usize = 15;

/// First octet of the host-side tap address, keeping it distinct from the
/// guest MAC.
const HOST_MAC_FIRST_OCTET: u8 = 0xfe;

/// [`HostDevices`] backed by the host network stack.
#[derive(Debug)]
pub struct SystemHostDevices {
    sysfs_root: Utf8PathBuf,
    ip: Utf8PathBuf,
    // Name selection and creation must not interleave between machines.
    naming: Mutex<()>,
}

impl SystemHostDevices {
    /// Builds a backend reading interfaces from `<sysfs_root>/class/net`.
    #[must_use]
    pub fn new(sysfs_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            ip: Utf8PathBuf::from("ip"),
            naming: Mutex::new(()),
        }
    }

    fn net_dir(&self) -> Utf8PathBuf {
        self.sysfs_root.join("class").join("net")
    }

    fn interface_exists(&self, name: &str) -> bool {
        self.net_dir().join(name).exists()
    }

    fn next_free_tap(&self) -> Result<String, ResourceError> {
        let dir = self.net_dir();
        let existing = fs::read_dir(&dir)
            .map_err(|source| ResourceError::ListInterfaces {
                path: dir.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect::<Vec<_>>();
        free_tap_name(&existing).ok_or(ResourceError::NoFreeTapName)
    }

    fn ip(&self, device: &str, args: &[&str]) -> Result<(), ResourceError> {
        run_tool(&self.ip, device, args)
    }

    fn configure_tap(&self, tap: &str, request: &TapRequest<'_>) -> Result<(), ResourceError> {
        let host_mac = request.mac.with_first_octet(HOST_MAC_FIRST_OCTET).to_string();
        self.ip(tap, &["link", "set", "dev", tap, "address", &host_mac])?;
        self.ip(tap, &["link", "set", "dev", tap, "master", request.bridge])?;
        self.ip(tap, &["link", "set", "dev", tap, "up"])
    }
}

impl HostDevices for SystemHostDevices {
    fn create_tap(&self, request: &TapRequest<'_>) -> Result<String, ResourceError> {
        if !self.interface_exists(request.bridge) {
            return Err(ResourceError::MissingBridge {
                bridge: request.bridge.to_owned(),
            });
        }
        let _naming = self
            .naming
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let tap = match request.name {
            Some(name) => name.to_owned(),
            None => self.next_free_tap()?,
        };
        self.ip(&tap, &["tuntap", "add", "dev", &tap, "mode", "tap"])?;
        if let Err(error) = self.configure_tap(&tap, request) {
            if let Err(cleanup) = self.delete_tap(&tap) {
                warn!(
                    target: RESOURCE_TARGET,
                    tap = %tap,
                    error = %cleanup,
                    "failed to remove half-configured tap"
                );
            }
            return Err(error);
        }
        Ok(tap)
    }

    fn detach_tap(&self, name: &str) -> Result<(), ResourceError> {
        self.ip(name, &["link", "set", "dev", name, "nomaster"])
    }

    fn delete_tap(&self, name: &str) -> Result<(), ResourceError> {
        self.ip(name, &["tuntap", "del", "dev", name, "mode", "tap"])
    }

    fn open_pty(&self) -> Result<Pty, ResourceError> {
        let pty_error = |errno: nix::errno::Errno| ResourceError::Pty {
            source: io::Error::from(errno),
        };
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
            .map_err(pty_error)?;
        grantpt(&master).map_err(pty_error)?;
        unlockpt(&master).map_err(pty_error)?;
        let path = ptsname_r(&master).map_err(pty_error)?;
        let path = Utf8PathBuf::from(path);
        // SAFETY: `into_raw_fd` hands over sole ownership of a valid open
        // descriptor.
        let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
        debug!(target: RESOURCE_TARGET, path = %path, "opened pseudo-terminal");
        Ok(Pty { master, path })
    }
}

/// First `tapN` not present in `existing`, if one fits an interface name.
pub(crate) fn free_tap_name(existing: &[String]) -> Option<String> {
    (0_u32..)
        .map(|index| format!("{TAP_PREFIX}{index}"))
        .take_while(|name| name.len() <= MAX_IFNAME_LEN)
        .find(|name| !existing.iter().any(|taken| taken == name))
}

fn run_tool(program: &Utf8Path, device: &str, args: &[&str]) -> Result<(), ResourceError> {
    let output = Command::new(program.as_std_path())
        .args(args)
        .output()
        .map_err(|source| ResourceError::ToolSpawn {
            program: program.to_string(),
            device: device.to_owned(),
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    Err(ResourceError::ToolFailed {
        command: format!("{program} {}", args.join(" ")),
        device: device.to_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}
