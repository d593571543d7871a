//! Starting, stopping and querying the external launcher.
//!
//! [`ProcessLauncher`] is the seam between the lifecycle controller and the
//! host's process table. The system implementation spawns the launcher
//! detached from the supervisor's terminal and process group, stops machines
//! through the companion control tool, and parses the launcher's version
//! banner.

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info};

use crate::synth::LaunchCommand;

pub(crate) const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");

/// Marker preceding the version in the launcher's `-v` output.
const VERSION_MARKER: &str = "DM version is: ";

/// Numeric identity reported for machines that are not running.
pub const INACTIVE_ID: i32 = -1;

/// A launched process whose exit can be awaited.
pub trait SupervisedProcess: Send {
    /// Operating system process identifier.
    fn pid(&self) -> u32;

    /// Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns the underlying wait failure.
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

impl SupervisedProcess for Child {
    fn pid(&self) -> u32 {
        self.id()
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        Self::wait(self)
    }
}

/// Operations on the launcher and control tool.
pub trait ProcessLauncher: Send + Sync {
    /// Spawns the launcher without waiting for it.
    ///
    /// # Errors
    ///
    /// Fails when the process cannot be spawned.
    fn spawn(&self, command: &LaunchCommand) -> Result<Box<dyn SupervisedProcess>, LauncherError>;

    /// Requests a forced stop of the named machine through the control tool.
    ///
    /// # Errors
    ///
    /// Fails when the tool cannot run or exits unsuccessfully.
    fn stop(&self, name: &str) -> Result<(), LauncherError>;

    /// Sends `SIGKILL` to a launcher process. A process that is already gone
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Fails when the signal cannot be delivered for another reason.
    fn kill(&self, pid: u32) -> Result<(), LauncherError>;

    /// Queries the launcher version as `major * 1_000_000 + minor * 1_000 + micro`.
    ///
    /// # Errors
    ///
    /// Fails when the launcher cannot run or its output has no version.
    fn version(&self) -> Result<u64, LauncherError>;
}

/// Launcher driving the real executables.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    launcher: Utf8PathBuf,
    control_tool: Utf8PathBuf,
}

impl SystemLauncher {
    /// Builds a launcher for the given executables.
    #[must_use]
    pub fn new(launcher: impl Into<Utf8PathBuf>, control_tool: impl Into<Utf8PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            control_tool: control_tool.into(),
        }
    }

    fn run(program: &Utf8Path, args: &[&str]) -> Result<String, LauncherError> {
        let output = Command::new(program.as_std_path())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| LauncherError::Spawn {
                program: program.to_owned(),
                source,
            })?;
        if !output.status.success() {
            return Err(LauncherError::NonZeroExit {
                program: program.to_owned(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, command: &LaunchCommand) -> Result<Box<dyn SupervisedProcess>, LauncherError> {
        use std::os::unix::process::CommandExt;

        let child = Command::new(command.program.as_std_path())
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|source| LauncherError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        info!(
            target: LAUNCHER_TARGET,
            pid = child.id(),
            command = %command.display(),
            "launcher spawned"
        );
        Ok(Box::new(child))
    }

    fn stop(&self, name: &str) -> Result<(), LauncherError> {
        debug!(target: LAUNCHER_TARGET, machine = name, "requesting forced stop");
        Self::run(&self.control_tool, &["stop", "-f", name]).map(|_| ())
    }

    fn kill(&self, pid: u32) -> Result<(), LauncherError> {
        let raw = i32::try_from(pid).map_err(|_| LauncherError::Signal {
            pid,
            source: Errno::EINVAL,
        })?;
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(LauncherError::Signal { pid, source }),
        }
    }

    fn version(&self) -> Result<u64, LauncherError> {
        let output = Self::run(&self.launcher, &["-v"])?;
        parse_version_output(&output).ok_or(LauncherError::UnparseableVersion { output })
    }
}

/// Extracts the version from launcher output.
///
/// Missing minor or micro components count as zero.
#[must_use]
pub fn parse_version_output(output: &str) -> Option<u64> {
    let (_, rest) = output.split_once(VERSION_MARKER)?;
    let token = rest.split_whitespace().next()?;
    let mut parts = token.splitn(3, '.');
    let major = leading_number(parts.next()?)?;
    let minor = parts.next().and_then(leading_number).unwrap_or(0);
    let micro = parts.next().and_then(leading_number).unwrap_or(0);
    Some(major * 1_000_000 + minor * 1_000 + micro)
}

fn leading_number(text: &str) -> Option<u64> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text.get(..end)?.parse().ok()
}

/// Numeric identity derived from a machine name.
///
/// Names of the form `vm<N>` or `instance-<N>` yield `N` (a sign is
/// accepted and trailing text ignored); anything else yields `0`.
#[must_use]
pub fn numeric_id(name: &str) -> i32 {
    ["vm", "instance-"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix).and_then(leading_integer))
        .unwrap_or(0)
}

fn leading_integer(text: &str) -> Option<i32> {
    let trimmed = text.trim_start();
    let digits_start = usize::from(trimmed.starts_with(['+', '-']));
    let end = trimmed
        .get(digits_start..)?
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed.len(), |offset| offset + digits_start);
    if end == digits_start {
        return None;
    }
    trimmed.get(..end)?.parse().ok()
}

/// Errors raised by the launcher seam.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// The executable could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Executable.
        program: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The executable reported failure.
    #[error("'{program}' exited with {}: {stderr}", code.map_or_else(|| "a signal".to_owned(), |c| format!("status {c}")))]
    NonZeroExit {
        /// Executable.
        program: Utf8PathBuf,
        /// Exit code, absent when killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Signalling a launcher process failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The version banner was missing or malformed.
    #[error("unrecognised launcher version output: {output}")]
    UnparseableVersion {
        /// Raw output.
        output: String,
    },
}
