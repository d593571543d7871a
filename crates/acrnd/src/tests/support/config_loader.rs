//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use acrn_config::Config;
use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use crate::bootstrap::ConfigLoader;

/// Loader that places every host path under a temporary directory.
///
/// The fake sysfs holds a single CPU and CPU offlining is disabled.
#[derive(Clone)]
pub struct TestConfigLoader {
    root: Arc<TempDir>,
}

impl TestConfigLoader {
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create temporary supervisor root");
        fs::create_dir_all(root.path().join("sys/devices/system/cpu/cpu0"))
            .expect("failed to create fake sysfs");
        Self {
            root: Arc::new(root),
        }
    }

    fn path(&self, relative: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.root.path().join(relative))
            .expect("temporary path was not valid UTF-8")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.path("run").into_std_path_buf()
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            config_dir: self.path("etc"),
            autostart_dir: self.path("etc/autostart"),
            runtime_dir: self.path("run"),
            sysfs_root: self.path("sys"),
            offline_host_cpus: false,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("acrnd"),
            OsString::from("--tap-delete-attempts"),
            OsString::from("several"),
        ];
        Config::load_from_iter(args)
    }
}
