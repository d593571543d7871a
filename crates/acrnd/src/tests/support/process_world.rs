//! Process supervision test world shared across BDD scenarios.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use acrn_config::{Config, RuntimePaths};
use serde_json::Value;
use signal_hook::consts::signal::SIGTERM;

use super::{
    FailingConfigLoader, FakeHostDevices, FakeLauncher, MemoryDefinitionStore,
    RecordingLifecycleReporter, TestConfigLoader, kernel_machine,
};
use crate::bootstrap::{ConfigLoader, HostProvider};
use crate::launcher::ProcessLauncher;
use crate::lifecycle::LifecycleReporter;
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::launch::{LaunchPlan, ProcessControl, ServiceDeps, run_daemon_with};
use crate::process::shutdown::{ShutdownCause, ShutdownError, ShutdownSignal};
use crate::process::{LaunchError, LaunchMode};
use crate::resources::HostDevices;
use crate::store::DefinitionStore;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type StepResult = Result<(), String>;

/// Host provider handing out shared in-memory doubles.
#[derive(Clone, Default)]
pub struct TestHostProvider {
    launcher: FakeLauncher,
    devices: FakeHostDevices,
    store: MemoryDefinitionStore,
}

impl HostProvider for TestHostProvider {
    fn launcher(&self, _config: &Config) -> Arc<dyn ProcessLauncher> {
        Arc::new(self.launcher.clone())
    }

    fn devices(&self, _config: &Config) -> Arc<dyn HostDevices> {
        Arc::new(self.devices.clone())
    }

    fn store(&self, _config: &Config) -> Arc<dyn DefinitionStore> {
        Arc::new(self.store.clone())
    }
}

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    reporter: Arc<RecordingLifecycleReporter>,
    provider: TestHostProvider,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingLifecycleReporter::default()),
            provider: TestHostProvider::default(),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::new(),
            handle: None,
            result: None,
        }
    }

    /// Seeds the store with `count` persisted machines.
    pub fn persist_machines(&mut self, count: usize) {
        let definitions = (0..count).map(|index| {
            let index = u128::try_from(index).expect("index fits");
            kernel_machine(&format!("vm{index}"), index + 1)
        });
        self.provider.store = MemoryDefinitionStore::with(definitions);
    }

    fn plan<L: ConfigLoader>(
        &self,
        mode: LaunchMode,
        loader: L,
        shutdown: TestShutdownSignal,
    ) -> LaunchPlan<L, TestHostProvider, TestDaemonizer, TestShutdownSignal> {
        let reporter = self.reporter.clone() as Arc<dyn LifecycleReporter>;
        LaunchPlan {
            process: ProcessControl {
                mode,
                daemonizer: self.daemonizer.clone(),
                shutdown,
            },
            services: ServiceDeps {
                loader,
                reporter,
                provider: self.provider.clone(),
            },
        }
    }

    pub fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already running".to_owned());
        }
        let plan = self.plan(
            LaunchMode::Background,
            self.loader.clone(),
            self.shutdown.clone(),
        );
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    pub fn start_foreground(&mut self, mode: LaunchMode, pretrigger: bool) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_owned());
        }
        let shutdown = TestShutdownSignal::new();
        if pretrigger {
            shutdown.trigger();
        }
        let plan = self.plan(mode, self.loader.clone(), shutdown);
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn start_foreground_with_invalid_config(&mut self) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_owned());
        }
        let plan = self.plan(
            LaunchMode::Foreground,
            FailingConfigLoader,
            TestShutdownSignal::new(),
        );
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn join_background(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_owned())?;
        match handle.join() {
            Ok(result) => {
                self.result = Some(result);
                Ok(())
            }
            Err(_) => Err("daemon thread panicked".to_owned()),
        }
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn lock_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("acrnd.lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("acrnd.pid")
    }

    pub fn health_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("acrnd.health")
    }

    pub fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    /// Leaves a lock file behind with `pid` recorded as its owner.
    pub fn write_stale_runtime(&self, pid: u32) -> StepResult {
        let config = self.loader.load().map_err(|error| error.to_string())?;
        RuntimePaths::from_config(&config).map_err(|error| error.to_string())?;
        fs::write(self.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(self.pid_path(), format!("{pid}\n")).map_err(|error| error.to_string())?;
        Ok(())
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn last_result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }

    pub fn wait_for_status(&self, expected: &str) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(snapshot) = self.read_health()
                && snapshot_status(&snapshot) == expected
            {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(format!("daemon did not publish {expected} health snapshot"))
    }
}

#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<ShutdownCause, ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            triggered = cvar
                .wait(triggered)
                .expect("shutdown mutex poisoned during wait");
        }
        Ok(ShutdownCause::Signal(SIGTERM))
    }
}

pub fn snapshot_status(snapshot: &Value) -> &str {
    snapshot
        .get("status")
        .and_then(Value::as_str)
        .expect("health snapshot should contain a status field")
}
