//! Shared event-loop thread delivering one-shot watch notifications.
//!
//! A watch pairs a callback, run on the loop thread, with a single-use
//! [`Notifier`] handed to a producer on another thread. The loop unregisters
//! a watch before running its callback, so every callback runs at most once
//! and notifications for removed watches are discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tracing::{debug, warn};

const EVENT_LOOP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::event_loop");

/// Callback run once on the loop thread.
pub type WatchCallback = Box<dyn FnOnce(WatchEvent) + Send>;

/// Identifier of a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// What a watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The producer delivered a status word.
    Readable(i32),
    /// The producer went away without delivering anything.
    Hangup,
}

enum Message {
    Fire { id: WatchId, event: WatchEvent },
    Shutdown,
}

struct Shared {
    watches: Mutex<HashMap<WatchId, WatchCallback>>,
    sender: Mutex<Option<Sender<Message>>>,
    next_id: AtomicU64,
    running: AtomicBool,
    thread_id: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn take_watch(&self, id: WatchId) -> Option<WatchCallback> {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

/// Single-use producer end of a watch.
///
/// Dropping a notifier without calling [`Notifier::notify`] delivers
/// [`WatchEvent::Hangup`].
pub struct Notifier {
    id: WatchId,
    sender: Option<Sender<Message>>,
}

impl Notifier {
    /// Delivers `status` to the watch.
    pub fn notify(mut self, status: i32) {
        self.send(WatchEvent::Readable(status));
    }

    fn send(&mut self, event: WatchEvent) {
        if let Some(sender) = self.sender.take() {
            // A stopped loop has dropped its receiver; nothing is listening.
            let _ = sender.send(Message::Fire { id: self.id, event });
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.send(WatchEvent::Hangup);
    }
}

/// Cloneable handle for registering and removing watches.
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<Shared>,
}

impl EventLoopHandle {
    /// Registers `callback` and returns its producer end.
    ///
    /// # Errors
    ///
    /// Fails once the loop has been shut down.
    pub fn add_watch(&self, callback: WatchCallback) -> Result<(WatchId, Notifier), EventLoopError> {
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EventLoopError::Stopped)?;
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(EventLoopError::Stopped);
        }
        let id = WatchId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback);
        Ok((
            id,
            Notifier {
                id,
                sender: Some(sender),
            },
        ))
    }

    /// Unregisters a watch. Returns whether it was still registered.
    pub fn remove_watch(&self, id: WatchId) -> bool {
        self.shared.take_watch(id).is_some()
    }

    /// Number of registered watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.shared
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the caller is running on the loop thread.
    #[must_use]
    pub fn on_loop_thread(&self) -> bool {
        let current = thread::current().id();
        *self
            .shared
            .thread_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(current)
    }
}

/// Owner of the loop thread.
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Spawns the loop thread.
    ///
    /// # Errors
    ///
    /// Fails when the thread cannot be spawned.
    pub fn start() -> Result<Self, EventLoopError> {
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            watches: Mutex::new(HashMap::new()),
            sender: Mutex::new(Some(sender)),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
            thread_id: Mutex::new(None),
        });
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("acrnd-events".to_owned())
            .spawn(move || run(&loop_shared, &receiver))
            .map_err(|source| EventLoopError::Spawn { source })?;
        *shared
            .thread_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(thread.thread().id());
        Ok(Self {
            handle: EventLoopHandle { shared },
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Handle for registering watches.
    #[must_use]
    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Stops the loop and joins its thread. Unfired callbacks are dropped.
    ///
    /// Safe to call repeatedly. Called from the loop thread itself it stops
    /// the loop without joining.
    pub fn shutdown(&self) {
        let shared = &self.handle.shared;
        shared.running.store(false, Ordering::Release);
        if let Some(sender) = shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = sender.send(Message::Shutdown);
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if self.handle.on_loop_thread() {
                return;
            }
            if thread.join().is_err() {
                warn!(target: EVENT_LOOP_TARGET, "event loop thread panicked");
            }
        }
        shared
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared, receiver: &Receiver<Message>) {
    debug!(target: EVENT_LOOP_TARGET, "event loop started");
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Fire { id, event } => match shared.take_watch(id) {
                Some(callback) => callback(event),
                None => debug!(target: EVENT_LOOP_TARGET, ?id, "discarding event for removed watch"),
            },
            Message::Shutdown => break,
        }
    }
    debug!(target: EVENT_LOOP_TARGET, "event loop stopped");
}

/// Errors raised by the event loop.
#[derive(Debug, Error)]
pub enum EventLoopError {
    /// The loop thread could not be spawned.
    #[error("failed to spawn event loop thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The loop has been shut down.
    #[error("event loop is not running")]
    Stopped,
}
