//! Lifecycle reporter that records events for assertions.

use std::sync::Mutex;

use crate::driver::{DriverError, ErrorKind};
use crate::lifecycle::{LifecycleEvent, LifecycleReporter};

/// Something the driver reported about a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A lifecycle transition.
    Lifecycle {
        machine: String,
        event: LifecycleEvent,
    },
    /// A rolled-back or refused start.
    StartFailed {
        machine: String,
        kind: ErrorKind,
        rolled_back: bool,
    },
}

/// Records every report for later inspection.
#[derive(Default)]
pub struct RecordingLifecycleReporter {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingLifecycleReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .clone()
    }

    /// Lifecycle transitions reported for `machine`, in order.
    pub fn lifecycle_of(&self, machine: &str) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter_map(|recorded| match recorded {
                RecordedEvent::Lifecycle {
                    machine: name,
                    event,
                } if name == machine => Some(event),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: RecordedEvent) {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .push(event);
    }
}

impl LifecycleReporter for RecordingLifecycleReporter {
    fn report(&self, machine: &str, event: LifecycleEvent) {
        self.record(RecordedEvent::Lifecycle {
            machine: machine.to_owned(),
            event,
        });
    }

    fn start_failed(&self, machine: &str, error: &DriverError) {
        self.record(RecordedEvent::StartFailed {
            machine: machine.to_owned(),
            kind: error.kind(),
            rolled_back: error.rolled_back(),
        });
    }
}
