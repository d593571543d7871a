//! Detaches the supervisor from its terminal.
//!
//! Once detached the process has no terminal for the console log layer, so
//! standard output and error are pointed at a file in the runtime directory
//! before the fork. The working directory moves to the runtime directory too,
//! which keeps the supervisor off any filesystem an operator may unmount.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use acrn_config::RuntimePaths;
use daemonize_me::{Daemon, DaemonError};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Permission bits withheld from files the daemon creates.
const DAEMON_UMASK: u16 = 0o027;

/// Detaches the process into the background.
pub trait Daemonizer: Send + Sync {
    /// Detaches, leaving the caller running in the background child.
    ///
    /// # Errors
    ///
    /// Fails when the console log cannot be opened or the fork fails.
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError>;
}

/// Errors surfaced while detaching.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The console log could not be opened for appending.
    #[error("failed to open console log '{path}': {source}")]
    ConsoleLog {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Forking or session setup failed.
    #[error("failed to detach supervisor: {source}")]
    Detach {
        /// Error reported by the daemonisation library.
        #[source]
        source: DaemonError,
    },
}

fn open_console_log(path: &Path) -> Result<File, DaemonizeError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DaemonizeError::ConsoleLog {
            path: path.to_path_buf(),
            source,
        })
}

/// Daemoniser backed by `daemonize-me`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        let log_path = paths.console_log_path();
        let stdout = open_console_log(log_path)?;
        let stderr = open_console_log(log_path)?;
        info!(
            target: PROCESS_TARGET,
            runtime = %paths.runtime_dir().display(),
            console_log = %log_path.display(),
            "detaching supervisor"
        );
        Daemon::new()
            .umask(DAEMON_UMASK)
            .work_dir(paths.runtime_dir())
            .stdout(stdout)
            .stderr(stderr)
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .start()
            .map_err(|source| DaemonizeError::Detach { source })?;
        info!(
            target: PROCESS_TARGET,
            pid = std::process::id(),
            "supervisor detached"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn console_log_appends_across_opens() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("acrnd.log");
        open_console_log(&path)
            .expect("first open")
            .write_all(b"one\n")
            .expect("write");
        open_console_log(&path)
            .expect("second open")
            .write_all(b"two\n")
            .expect("write");
        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents, "one\ntwo\n");
    }

    #[test]
    fn missing_runtime_directory_is_reported() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("absent").join("acrnd.log");
        let error = open_console_log(&path).expect_err("open should fail");
        assert!(matches!(error, DaemonizeError::ConsoleLog { .. }));
        assert!(error.to_string().contains("absent"));
    }
}
