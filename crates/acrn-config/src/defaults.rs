use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;

/// Hypervisor device-model launcher.
pub const DEFAULT_LAUNCHER_PATH: &str = "/usr/bin/acrn-dm";

/// Companion tool used to force-stop a machine.
pub const DEFAULT_CONTROL_TOOL_PATH: &str = "/usr/bin/acrnctl";

/// Directory holding persisted machine definitions.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/acrnd";

/// Directory holding autostart links.
pub const DEFAULT_AUTOSTART_DIR: &str = "/etc/acrnd/autostart";

/// Root of the sysfs mount.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Pre-registered capacity identifiers, highest priority first.
pub const DEFAULT_CAPACITY_IDS: [&str; 2] = [
    "d2795438-25d6-11e8-864e-cb7a18b34643",
    "a7ada506-1ab0-4b6b-a0da-e513ca9b8c2f",
];

/// Attempts made to delete a tap device after its machine stopped.
pub const DEFAULT_TAP_DELETE_ATTEMPTS: u32 = 5;

/// Delay between tap deletion attempts.
pub const DEFAULT_TAP_DELETE_DELAY_MS: u64 = 1_000;

/// Read-back attempts while waiting for a CPU to go offline.
pub const DEFAULT_CPU_OFFLINE_ATTEMPTS: u32 = 100;

/// Delay between CPU offline read-backs.
pub const DEFAULT_CPU_OFFLINE_DELAY_MS: u64 = 10;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default launcher path.
pub fn default_launcher_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_LAUNCHER_PATH)
}

/// Default control tool path.
pub fn default_control_tool_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_CONTROL_TOOL_PATH)
}

/// Default definition directory.
pub fn default_config_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_CONFIG_DIR)
}

/// Default autostart directory.
pub fn default_autostart_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_AUTOSTART_DIR)
}

/// Default sysfs root.
pub fn default_sysfs_root() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_SYSFS_ROOT)
}

/// Default capacity identifiers as owned strings.
pub fn default_capacity_ids() -> Vec<String> {
    DEFAULT_CAPACITY_IDS.iter().map(|id| (*id).to_owned()).collect()
}

/// Default tap deletion attempts.
pub const fn default_tap_delete_attempts() -> u32 {
    DEFAULT_TAP_DELETE_ATTEMPTS
}

/// Default tap deletion delay in milliseconds.
pub const fn default_tap_delete_delay_ms() -> u64 {
    DEFAULT_TAP_DELETE_DELAY_MS
}

/// Default CPU offline read-back attempts.
pub const fn default_cpu_offline_attempts() -> u32 {
    DEFAULT_CPU_OFFLINE_ATTEMPTS
}

/// Default CPU offline read-back delay in milliseconds.
pub const fn default_cpu_offline_delay_ms() -> u64 {
    DEFAULT_CPU_OFFLINE_DELAY_MS
}

/// Secondary CPUs are handed to the hypervisor unless disabled.
pub const fn default_offline_host_cpus() -> bool {
    true
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the directory for the daemon's lock, pid and health files.
///
/// Root uses `/run/acrnd`. Other users get `acrnd` under their runtime
/// directory, or a uid-scoped directory under the temporary directory.
pub fn default_runtime_dir() -> Utf8PathBuf {
    default_runtime_dir_inner()
}

#[cfg(unix)]
fn default_runtime_dir_inner() -> Utf8PathBuf {
    let uid = unsafe { geteuid() };
    if uid == 0 {
        return Utf8PathBuf::from("/run/acrnd");
    }
    if let Some(mut dir) = runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        dir.push("acrnd");
        return dir;
    }
    let mut dir = fallback_base_directory();
    dir.push("acrnd");
    dir.push(format!("uid-{uid}"));
    dir
}

#[cfg(not(unix))]
fn default_runtime_dir_inner() -> Utf8PathBuf {
    let mut dir = fallback_base_directory();
    dir.push("acrnd");
    dir
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
