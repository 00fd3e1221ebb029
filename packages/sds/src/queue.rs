//! Optional bounded channel between event delivery and dispatch.
//!
//! # Guarantees
//!
//! - **Per-instance order**: one worker drains each queue, in arrival order
//! - **Never blocks the core**: a full queue drops the incoming event
//! - **In-memory only**: events buffered at shutdown are drained, not persisted
//!
//! A dropped notification is recoverable through the core's periodic sync, so
//! overflow is logged as a warning rather than surfaced anywhere.

use std::io;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default number of pending events a queued manager buffers.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How delivered events reach the callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Decode and dispatch on the thread the core delivered the event on.
    #[default]
    Inline,
    /// Hand events to a per-manager worker through a bounded channel.
    Queued { capacity: usize },
}

impl DispatchMode {
    /// Queued dispatch with [`EVENT_CHANNEL_CAPACITY`].
    pub fn queued() -> Self {
        DispatchMode::Queued {
            capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Why an event could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueRejection {
    Full,
    Closed,
}

pub(crate) struct EventQueue {
    sender: mpsc::Sender<String>,
    worker: JoinHandle<()>,
}

impl EventQueue {
    /// Start a named worker that feeds every queued payload to `handle`.
    pub fn spawn<F>(name: String, capacity: usize, mut handle: F) -> io::Result<Self>
    where
        F: FnMut(String) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<String>(capacity.max(1));

        let worker = thread::Builder::new().name(name).spawn(move || {
            while let Some(payload) = receiver.blocking_recv() {
                handle(payload);
            }
        })?;

        Ok(Self { sender, worker })
    }

    pub fn push(&self, payload: &str) -> Result<(), QueueRejection> {
        self.sender
            .try_send(payload.to_string())
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueRejection::Full,
                TrySendError::Closed(_) => QueueRejection::Closed,
            })
    }

    /// Close the channel and wait for buffered events to drain.
    ///
    /// Called from the worker itself (a hook cleaning up its own manager),
    /// this only closes the channel; the worker exits after the current event.
    pub fn close(self) {
        let EventQueue { sender, worker } = self;
        drop(sender);

        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
    }
}
