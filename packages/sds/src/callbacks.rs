//! User-supplied hooks invoked for decoded events.

use std::fmt;
use std::sync::Arc;

use crate::types::{HistoryEntry, MessageId};

pub type MessageHook = Arc<dyn Fn(MessageId, String) + Send + Sync>;
pub type MissingDepsHook = Arc<dyn Fn(MessageId, Vec<HistoryEntry>, String) + Send + Sync>;
pub type PeriodicSyncHook = Arc<dyn Fn() + Send + Sync>;
pub type RetrievalHintProvider = Arc<dyn Fn(&MessageId) -> Vec<u8> + Send + Sync>;

/// The set of hooks registered on a manager.
///
/// Every hook is optional; an unset hook makes the matching event a no-op.
/// A set is replaced wholesale by
/// [`ReliabilityManager::register_callbacks`](crate::ReliabilityManager::register_callbacks),
/// never merged.
///
/// ```ignore
/// let callbacks = EventCallbacks::new()
///     .on_message_ready(|id, channel| println!("ready: {id} on {channel}"))
///     .retrieval_hint_provider(|id| store.hint_for(id));
/// manager.register_callbacks(callbacks)?;
/// ```
#[derive(Clone, Default)]
pub struct EventCallbacks {
    pub on_message_ready: Option<MessageHook>,
    pub on_message_sent: Option<MessageHook>,
    pub on_missing_dependencies: Option<MissingDepsHook>,
    pub on_periodic_sync: Option<PeriodicSyncHook>,
    pub retrieval_hint_provider: Option<RetrievalHintProvider>,
}

impl EventCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(MessageId, String) + Send + Sync + 'static,
    {
        self.on_message_ready = Some(Arc::new(f));
        self
    }

    pub fn on_message_sent<F>(mut self, f: F) -> Self
    where
        F: Fn(MessageId, String) + Send + Sync + 'static,
    {
        self.on_message_sent = Some(Arc::new(f));
        self
    }

    pub fn on_missing_dependencies<F>(mut self, f: F) -> Self
    where
        F: Fn(MessageId, Vec<HistoryEntry>, String) + Send + Sync + 'static,
    {
        self.on_missing_dependencies = Some(Arc::new(f));
        self
    }

    pub fn on_periodic_sync<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_periodic_sync = Some(Arc::new(f));
        self
    }

    /// Hook the core consults for the retrieval hint of an outgoing message.
    pub fn retrieval_hint_provider<F>(mut self, f: F) -> Self
    where
        F: Fn(&MessageId) -> Vec<u8> + Send + Sync + 'static,
    {
        self.retrieval_hint_provider = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for EventCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("on_message_ready", &self.on_message_ready.is_some())
            .field("on_message_sent", &self.on_message_sent.is_some())
            .field("on_missing_dependencies", &self.on_missing_dependencies.is_some())
            .field("on_periodic_sync", &self.on_periodic_sync.is_some())
            .field("retrieval_hint_provider", &self.retrieval_hint_provider.is_some())
            .finish()
    }
}
