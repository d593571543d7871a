//! Supervisor bootstrap orchestration.
//!
//! Bootstrap turns a loaded [`Config`] into an open [`Driver`]: it measures
//! and optionally offlines the host CPUs, derives the driver settings and
//! wires the host collaborators supplied by a [`HostProvider`].

use std::sync::Arc;

use acrn_config::Config;
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::info;

use crate::driver::{Driver, DriverDeps, DriverError, DriverSettings};
use crate::host::{HostCpus, HostError, NodeInfo};
use crate::launcher::{ProcessLauncher, SystemLauncher};
use crate::lifecycle::LifecycleReporter;
use crate::resources::{HostDevices, InvalidCapacityId, SystemHostDevices};
use crate::retry::RetryPolicy;
use crate::store::{DefinitionStore, FileDefinitionStore};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the supervisor configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when a layer fails to parse.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Builds the host collaborators the driver runs against.
pub trait HostProvider: Send + Sync {
    /// Starts and stops launcher processes.
    fn launcher(&self, config: &Config) -> Arc<dyn ProcessLauncher>;

    /// Creates taps and pseudo-terminals.
    fn devices(&self, config: &Config) -> Arc<dyn HostDevices>;

    /// Persists definitions.
    fn store(&self, config: &Config) -> Arc<dyn DefinitionStore>;
}

/// Provider backed by the real executables, network stack and filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostProvider;

impl HostProvider for SystemHostProvider {
    fn launcher(&self, config: &Config) -> Arc<dyn ProcessLauncher> {
        Arc::new(SystemLauncher::new(
            config.launcher_path(),
            config.control_tool_path(),
        ))
    }

    fn devices(&self, config: &Config) -> Arc<dyn HostDevices> {
        Arc::new(SystemHostDevices::new(config.sysfs_root()))
    }

    fn store(&self, config: &Config) -> Arc<dyn DefinitionStore> {
        Arc::new(FileDefinitionStore::new(
            config.config_dir(),
            config.autostart_dir(),
        ))
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Host CPUs could not be counted or offlined.
    #[error("failed to prepare host cpus: {source}")]
    Host {
        /// Underlying host error.
        #[source]
        source: HostError,
    },
    /// A configured capacity identifier was malformed.
    #[error("invalid capacity pool: {source}")]
    CapacityPool {
        /// Underlying parse error.
        #[source]
        source: InvalidCapacityId,
    },
    /// The driver could not be opened.
    #[error("failed to open driver: {source}")]
    Driver {
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },
}

impl From<HostError> for BootstrapError {
    fn from(source: HostError) -> Self {
        Self::Host { source }
    }
}

impl From<InvalidCapacityId> for BootstrapError {
    fn from(source: InvalidCapacityId) -> Self {
        Self::CapacityPool { source }
    }
}

impl From<DriverError> for BootstrapError {
    fn from(source: DriverError) -> Self {
        Self::Driver { source }
    }
}

/// Prepares the host and opens the driver using the supplied collaborators.
///
/// # Errors
///
/// Fails when the host CPUs cannot be prepared, the capacity pool is
/// malformed or the driver cannot load its persisted machines.
pub fn bootstrap_with(
    config: &Config,
    reporter: Arc<dyn LifecycleReporter>,
    provider: &dyn HostProvider,
) -> Result<Driver, BootstrapError> {
    let cpus = HostCpus::new(
        config.sysfs_root(),
        RetryPolicy::new(config.cpu_offline_attempts(), config.cpu_offline_delay()),
    );
    let node = NodeInfo { cpus: cpus.count()? };
    if config.offline_host_cpus() {
        cpus.offline_secondary(node.cpus)?;
    }
    let settings = DriverSettings::from_config(config)?;
    let driver = Driver::open(DriverDeps {
        settings,
        launcher: provider.launcher(config),
        devices: provider.devices(config),
        store: provider.store(config),
        reporter,
        node,
    })?;
    info!(
        target: BOOTSTRAP_TARGET,
        cpus = node.cpus,
        machines = driver.machine_count(),
        "supervisor bootstrapped"
    );
    Ok(driver)
}
