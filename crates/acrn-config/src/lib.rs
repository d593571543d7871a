//! Layered configuration for the ACRN machine supervisor.
//!
//! [`Config`] is resolved by `ortho_config` from built-in defaults, an
//! optional configuration file (`--config-path`), `ACRND_*` environment
//! variables and command-line flags, in increasing order of precedence.
//! The daemon reads tool locations, host paths, capacity identifiers, retry
//! budgets and logging settings from it.

mod defaults;
mod logging;
mod runtime;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_AUTOSTART_DIR, DEFAULT_CAPACITY_IDS, DEFAULT_CONFIG_DIR, DEFAULT_CONTROL_TOOL_PATH,
    DEFAULT_CPU_OFFLINE_ATTEMPTS, DEFAULT_CPU_OFFLINE_DELAY_MS, DEFAULT_LAUNCHER_PATH,
    DEFAULT_LOG_FILTER, DEFAULT_SYSFS_ROOT, DEFAULT_TAP_DELETE_ATTEMPTS,
    DEFAULT_TAP_DELETE_DELAY_MS, default_autostart_dir, default_capacity_ids, default_config_dir,
    default_control_tool_path, default_cpu_offline_attempts, default_cpu_offline_delay_ms,
    default_launcher_path, default_log_filter, default_log_filter_string, default_log_format,
    default_offline_host_cpus, default_runtime_dir, default_sysfs_root,
    default_tap_delete_attempts, default_tap_delete_delay_ms,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Resolved supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "ACRND")]
pub struct Config {
    /// Device-model launcher executable.
    #[serde(default = "default_launcher_path")]
    pub launcher_path: Utf8PathBuf,
    /// Control tool used to force-stop machines.
    #[serde(default = "default_control_tool_path")]
    pub control_tool_path: Utf8PathBuf,
    /// Directory holding persisted definitions.
    #[serde(default = "default_config_dir")]
    pub config_dir: Utf8PathBuf,
    /// Directory holding autostart links.
    #[serde(default = "default_autostart_dir")]
    pub autostart_dir: Utf8PathBuf,
    /// Directory for the daemon's lock, pid and health files.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: Utf8PathBuf,
    /// Root of the sysfs mount used for CPU and network probing.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: Utf8PathBuf,
    /// Capacity identifiers in allocation priority order.
    #[serde(default = "default_capacity_ids")]
    pub capacity_ids: Vec<String>,
    /// Attempts made to delete a tap after its machine stopped.
    #[serde(default = "default_tap_delete_attempts")]
    pub tap_delete_attempts: u32,
    /// Delay between tap deletion attempts, in milliseconds.
    #[serde(default = "default_tap_delete_delay_ms")]
    pub tap_delete_delay_ms: u64,
    /// Read-back attempts while a CPU goes offline.
    #[serde(default = "default_cpu_offline_attempts")]
    pub cpu_offline_attempts: u32,
    /// Delay between CPU offline read-backs, in milliseconds.
    #[serde(default = "default_cpu_offline_delay_ms")]
    pub cpu_offline_delay_ms: u64,
    /// Whether secondary host CPUs are handed to the hypervisor at startup.
    #[serde(default = "default_offline_host_cpus")]
    pub offline_host_cpus: bool,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            launcher_path: default_launcher_path(),
            control_tool_path: default_control_tool_path(),
            config_dir: default_config_dir(),
            autostart_dir: default_autostart_dir(),
            runtime_dir: default_runtime_dir(),
            sysfs_root: default_sysfs_root(),
            capacity_ids: default_capacity_ids(),
            tap_delete_attempts: default_tap_delete_attempts(),
            tap_delete_delay_ms: default_tap_delete_delay_ms(),
            cpu_offline_attempts: default_cpu_offline_attempts(),
            cpu_offline_delay_ms: default_cpu_offline_delay_ms(),
            offline_host_cpus: default_offline_host_cpus(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Device-model launcher executable.
    #[must_use]
    pub fn launcher_path(&self) -> &Utf8Path {
        &self.launcher_path
    }

    /// Control tool executable.
    #[must_use]
    pub fn control_tool_path(&self) -> &Utf8Path {
        &self.control_tool_path
    }

    /// Directory holding persisted definitions.
    #[must_use]
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Directory holding autostart links.
    #[must_use]
    pub fn autostart_dir(&self) -> &Utf8Path {
        &self.autostart_dir
    }

    /// Directory for runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Utf8Path {
        &self.runtime_dir
    }

    /// Root of the sysfs mount.
    #[must_use]
    pub fn sysfs_root(&self) -> &Utf8Path {
        &self.sysfs_root
    }

    /// Capacity identifiers in priority order.
    #[must_use]
    pub fn capacity_ids(&self) -> &[String] {
        &self.capacity_ids
    }

    /// Attempts made to delete a tap.
    #[must_use]
    pub const fn tap_delete_attempts(&self) -> u32 {
        self.tap_delete_attempts
    }

    /// Delay between tap deletion attempts.
    #[must_use]
    pub const fn tap_delete_delay(&self) -> Duration {
        Duration::from_millis(self.tap_delete_delay_ms)
    }

    /// Read-back attempts while a CPU goes offline.
    #[must_use]
    pub const fn cpu_offline_attempts(&self) -> u32 {
        self.cpu_offline_attempts
    }

    /// Delay between CPU offline read-backs.
    #[must_use]
    pub const fn cpu_offline_delay(&self) -> Duration {
        Duration::from_millis(self.cpu_offline_delay_ms)
    }

    /// Whether secondary host CPUs are offlined at startup.
    #[must_use]
    pub const fn offline_host_cpus(&self) -> bool {
        self.offline_host_cpus
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
