//! Scriptable launcher processes.

use std::collections::HashMap;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8PathBuf;

use crate::launcher::{LauncherError, ProcessLauncher, SupervisedProcess};
use crate::synth::LaunchCommand;

type WaitOutcome = io::Result<ExitStatus>;

/// A process that exits when its [`ExitTrigger`] fires.
pub struct ControlledProcess {
    pid: u32,
    outcome: Receiver<WaitOutcome>,
}

impl SupervisedProcess for ControlledProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        self.outcome
            .recv()
            .unwrap_or_else(|_| Err(io::Error::other("exit trigger dropped")))
    }
}

/// Ends a [`ControlledProcess`]. Only the first outcome is observed.
#[derive(Clone)]
pub struct ExitTrigger {
    outcome: Sender<WaitOutcome>,
}

impl ExitTrigger {
    /// Terminates the process with `signal`.
    pub fn signal(&self, signal: i32) {
        self.deliver(Ok(ExitStatus::from_raw(signal)));
    }

    /// Exits the process with `code`.
    pub fn exit(&self, code: i32) {
        self.deliver(Ok(ExitStatus::from_raw(code << 8)));
    }

    /// Makes the wait itself fail.
    pub fn fail(&self) {
        self.deliver(Err(io::Error::other("wait failed")));
    }

    fn deliver(&self, outcome: WaitOutcome) {
        // The process may already have been reaped.
        drop(self.outcome.send(outcome));
    }
}

/// Builds a process with `pid` and the trigger that ends it.
pub fn controlled_process(pid: u32) -> (ControlledProcess, ExitTrigger) {
    let (tx, rx) = channel();
    (
        ControlledProcess { pid, outcome: rx },
        ExitTrigger { outcome: tx },
    )
}

/// Launcher whose processes are driven by the test.
///
/// `stop` makes the named machine exit cleanly and `kill` delivers
/// `SIGKILL`, mirroring what the real tools do to the launcher.
#[derive(Clone)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

struct Running {
    pid: u32,
    trigger: ExitTrigger,
}

struct LauncherState {
    next_pid: u32,
    commands: Vec<LaunchCommand>,
    running: HashMap<String, Running>,
    stops: Vec<String>,
    kills: Vec<u32>,
    fail_spawn: bool,
    fail_stop: bool,
    version: u64,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(LauncherState {
                next_pid: 1000,
                commands: Vec::new(),
                running: HashMap::new(),
                stops: Vec::new(),
                kills: Vec::new(),
                fail_spawn: false,
                fail_stop: false,
                version: 1_002_003,
            })),
        }
    }
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().expect("launcher state mutex poisoned")
    }

    /// Every command spawned so far.
    pub fn commands(&self) -> Vec<LaunchCommand> {
        self.state().commands.clone()
    }

    /// Machines the stop tool was run for.
    pub fn stops(&self) -> Vec<String> {
        self.state().stops.clone()
    }

    /// Pids that were sent `SIGKILL`.
    pub fn kills(&self) -> Vec<u32> {
        self.state().kills.clone()
    }

    pub fn fail_spawns(&self) {
        self.state().fail_spawn = true;
    }

    pub fn fail_stops(&self) {
        self.state().fail_stop = true;
    }

    pub fn pid_of(&self, machine: &str) -> Option<u32> {
        self.state().running.get(machine).map(|running| running.pid)
    }

    /// Ends the machine's launcher as the guest would, with `code`.
    pub fn guest_exit(&self, machine: &str, code: i32) {
        if let Some(running) = self.state().running.remove(machine) {
            running.trigger.exit(code);
        }
    }

    /// Ends the machine's launcher with `signal`.
    pub fn crash(&self, machine: &str, signal: i32) {
        if let Some(running) = self.state().running.remove(machine) {
            running.trigger.signal(signal);
        }
    }
}

impl ProcessLauncher for FakeLauncher {
    fn spawn(&self, command: &LaunchCommand) -> Result<Box<dyn SupervisedProcess>, LauncherError> {
        let mut state = self.state();
        state.commands.push(command.clone());
        if state.fail_spawn {
            return Err(LauncherError::Spawn {
                program: command.program.clone(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        let name = command.args.last().cloned().unwrap_or_default();
        let pid = state.next_pid;
        state.next_pid += 1;
        let (process, trigger) = controlled_process(pid);
        state.running.insert(name, Running { pid, trigger });
        Ok(Box::new(process))
    }

    fn stop(&self, name: &str) -> Result<(), LauncherError> {
        let mut state = self.state();
        state.stops.push(name.to_owned());
        if state.fail_stop {
            return Err(LauncherError::NonZeroExit {
                program: Utf8PathBuf::from("/usr/bin/acrnctl"),
                code: Some(1),
                stderr: format!("{name}: no such vm"),
            });
        }
        if let Some(running) = state.running.remove(name) {
            running.trigger.exit(0);
        }
        Ok(())
    }

    fn kill(&self, pid: u32) -> Result<(), LauncherError> {
        let mut state = self.state();
        state.kills.push(pid);
        let machine = state
            .running
            .iter()
            .find(|(_, running)| running.pid == pid)
            .map(|(name, _)| name.clone());
        if let Some(running) = machine.and_then(|name| state.running.remove(&name)) {
            running.trigger.signal(9);
        }
        Ok(())
    }

    fn version(&self) -> Result<u64, LauncherError> {
        Ok(self.state().version)
    }
}
