//! Derives runtime artefact paths for the supervisor daemon.
//!
//! The runtime directory houses the daemon lock, pid and health snapshots so
//! a second launch can detect a live supervisor and operators can inspect
//! its readiness.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for runtime artefacts written by the daemon.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
    console_log_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the configuration, creating the directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory is empty or cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let dir = config.runtime_dir();
        if dir.as_str().is_empty() {
            return Err(RuntimePathsError::EmptyRuntimeDirectory);
        }
        let runtime_dir = dir.as_std_path().to_path_buf();
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self {
            lock_path: runtime_dir.join("acrnd.lock"),
            pid_path: runtime_dir.join("acrnd.pid"),
            health_path: runtime_dir.join("acrnd.health"),
            console_log_path: runtime_dir.join("acrnd.log"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the PID file.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    #[must_use]
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }

    /// File receiving standard output and error once the daemon detaches.
    #[must_use]
    pub fn console_log_path(&self) -> &Path {
        self.console_log_path.as_path()
    }
}

/// Errors raised while deriving daemon runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// The configured runtime directory was empty.
    #[error("runtime directory must not be empty")]
    EmptyRuntimeDirectory,
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn derives_paths_under_configured_directory() {
        let temp = TempDir::new().expect("temp dir");
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("run")).expect("utf-8 temp path");
        let config = Config {
            runtime_dir: dir.clone(),
            ..Config::default()
        };
        let paths = RuntimePaths::from_config(&config).expect("paths should derive");
        assert!(paths.runtime_dir().is_dir(), "runtime dir should be created");
        assert_eq!(paths.runtime_dir(), dir.as_std_path());
        assert!(paths.lock_path().ends_with("acrnd.lock"));
        assert!(paths.pid_path().ends_with("acrnd.pid"));
        assert!(paths.health_path().ends_with("acrnd.health"));
        assert!(paths.console_log_path().ends_with("acrnd.log"));
    }

    #[test]
    fn rejects_empty_runtime_directory() {
        let config = Config {
            runtime_dir: Utf8PathBuf::new(),
            ..Config::default()
        };
        let error = RuntimePaths::from_config(&config).expect_err("empty dir should fail");
        assert!(matches!(error, RuntimePathsError::EmptyRuntimeDirectory));
    }
}
