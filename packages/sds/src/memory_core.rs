//! In-process reliability core.
//!
//! Implements [`NativeCore`] without the native library so managers can run
//! (and be tested) end to end. Per context and channel it tracks:
//!
//! - which message ids are locally delivered
//! - a bounded causal history attached to outgoing messages
//! - outgoing ids not yet acknowledged by a peer
//! - incoming messages buffered until their dependencies are met
//!
//! The wire envelope is private to this core. Events are emitted only after
//! the core's lock is released, so listeners may call straight back in.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime;
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::error::{NativeResult, NativeStatus};
use crate::event::SdsEvent;
use crate::lock::lock;
use crate::native::{ContextHandle, EventListener, NativeCore};
use crate::types::{HistoryEntry, MessageId, UnwrappedMessage};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CAUSAL_HISTORY: usize = 10;

/// Status codes reported by [`MemoryCore`].
pub mod status {
    pub const UNKNOWN_CONTEXT: i32 = 1;
    pub const INVALID_ARGUMENT: i32 = 2;
    pub const DECODE_FAILED: i32 = 3;
    pub const UNKNOWN_MESSAGE: i32 = 4;
    pub const ALREADY_STARTED: i32 = 5;
    pub const ENCODE_FAILED: i32 = 6;
}

// Handles are unique across every core in the process, so managers on
// different cores can share one registry.
static NEXT_CONTEXT: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone)]
pub struct MemoryCoreOptions {
    /// Interval between `periodic_sync` events once periodic tasks start.
    pub sync_interval: Duration,
    /// Number of most recent delivered ids attached to an outgoing message.
    pub max_causal_history: usize,
}

impl Default for MemoryCoreOptions {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_causal_history: DEFAULT_MAX_CAUSAL_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    message_id: MessageId,
    channel_id: String,
    lamport_timestamp: u64,
    causal_history: Vec<HistoryEntry>,
    content: Vec<u8>,
}

impl WireMessage {
    fn unmet_dependencies(&self, channel: &ChannelState) -> Vec<HistoryEntry> {
        self.causal_history
            .iter()
            .filter(|dep| !channel.delivered.contains(&dep.message_id))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct ChannelState {
    lamport: u64,
    delivered: HashSet<MessageId>,
    history: VecDeque<MessageId>,
    unacked: Vec<MessageId>,
    pending: Vec<WireMessage>,
}

impl ChannelState {
    fn deliver(&mut self, id: MessageId, max_history: usize) {
        if self.delivered.insert(id.clone()) {
            self.history.push_back(id);
            while self.history.len() > max_history {
                self.history.pop_front();
            }
        }
    }

    /// Deliver every buffered message whose dependencies are now met,
    /// repeating until no more are released.
    fn release_pending(&mut self, channel_id: &str, max_history: usize, events: &mut Vec<SdsEvent>) {
        loop {
            let Some(pos) = self
                .pending
                .iter()
                .position(|m| m.unmet_dependencies(self).is_empty())
            else {
                break;
            };

            let message = self.pending.remove(pos);
            self.lamport = self.lamport.max(message.lamport_timestamp);
            self.deliver(message.message_id.clone(), max_history);
            events.push(SdsEvent::MessageReady {
                message_id: message.message_id,
                channel_id: channel_id.to_string(),
            });
        }
    }

    fn is_known(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
            || self.pending.iter().any(|m| {
                &m.message_id == id || m.causal_history.iter().any(|dep| &dep.message_id == id)
            })
    }
}

struct PeriodicTask {
    stop: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

impl PeriodicTask {
    fn stop(self) {
        let PeriodicTask { stop, worker } = self;
        let _ = stop.send(());
        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
    }
}

struct ContextState {
    listener: Arc<dyn EventListener>,
    channels: HashMap<String, ChannelState>,
    periodic: Option<PeriodicTask>,
}

/// A [`NativeCore`] that keeps all state in memory.
pub struct MemoryCore {
    options: MemoryCoreOptions,
    contexts: Mutex<HashMap<ContextHandle, ContextState>>,
}

impl MemoryCore {
    pub fn new() -> Self {
        Self::with_options(MemoryCoreOptions::default())
    }

    pub fn with_options(options: MemoryCoreOptions) -> Self {
        Self {
            options,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Number of messages buffered on `channel_id` awaiting dependencies.
    pub fn pending_count(&self, ctx: ContextHandle, channel_id: &str) -> usize {
        lock(&self.contexts, "memory core")
            .get(&ctx)
            .and_then(|state| state.channels.get(channel_id))
            .map_or(0, |channel| channel.pending.len())
    }

    /// Run `f` against the context's state under the core lock.
    fn with_context<R>(
        &self,
        ctx: ContextHandle,
        f: impl FnOnce(&mut ContextState) -> NativeResult<R>,
    ) -> NativeResult<R> {
        let mut contexts = lock(&self.contexts, "memory core");
        let state = contexts.get_mut(&ctx).ok_or_else(|| unknown_context(ctx))?;
        f(state)
    }

    fn emit(listener: &dyn EventListener, ctx: ContextHandle, events: Vec<SdsEvent>) {
        for event in events {
            listener.on_event(ctx, &event.to_json());
        }
    }
}

impl Default for MemoryCore {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_context(ctx: ContextHandle) -> NativeStatus {
    NativeStatus::new(status::UNKNOWN_CONTEXT, format!("unknown context {}", ctx))
}

impl NativeCore for MemoryCore {
    fn create_context(&self, listener: Arc<dyn EventListener>) -> NativeResult<ContextHandle> {
        let ctx = ContextHandle::from_raw(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        lock(&self.contexts, "memory core").insert(
            ctx,
            ContextState {
                listener,
                channels: HashMap::new(),
                periodic: None,
            },
        );
        debug!(ctx = %ctx, "memory core context created");
        Ok(ctx)
    }

    fn destroy_context(&self, ctx: ContextHandle) -> NativeResult<()> {
        let state = lock(&self.contexts, "memory core")
            .remove(&ctx)
            .ok_or_else(|| unknown_context(ctx))?;

        if let Some(periodic) = state.periodic {
            periodic.stop();
        }
        debug!(ctx = %ctx, "memory core context destroyed");
        Ok(())
    }

    fn reset(&self, ctx: ContextHandle) -> NativeResult<()> {
        self.with_context(ctx, |state| {
            state.channels.clear();
            Ok(())
        })
    }

    fn wrap_outgoing(
        &self,
        ctx: ContextHandle,
        payload: &[u8],
        message_id: &MessageId,
        channel_id: &str,
    ) -> NativeResult<Vec<u8>> {
        if message_id.as_str().is_empty() {
            return Err(NativeStatus::new(
                status::INVALID_ARGUMENT,
                "message id must not be empty",
            ));
        }

        let (listener, dependencies, lamport) = self.with_context(ctx, |state| {
            let channel = state.channels.entry(channel_id.to_string()).or_default();
            channel.lamport += 1;
            let dependencies: Vec<MessageId> = channel.history.iter().cloned().collect();
            Ok((state.listener.clone(), dependencies, channel.lamport))
        })?;

        // Hints come from the managed side; ask without holding the core lock.
        let causal_history = dependencies
            .into_iter()
            .map(|id| {
                let hint = listener.retrieval_hint(ctx, &id);
                HistoryEntry::new(id, hint)
            })
            .collect();

        let max_history = self.options.max_causal_history;
        self.with_context(ctx, |state| {
            let channel = state.channels.entry(channel_id.to_string()).or_default();
            channel.deliver(message_id.clone(), max_history);
            if !channel.unacked.contains(message_id) {
                channel.unacked.push(message_id.clone());
            }
            Ok(())
        })?;

        let wire = WireMessage {
            message_id: message_id.clone(),
            channel_id: channel_id.to_string(),
            lamport_timestamp: lamport,
            causal_history,
            content: payload.to_vec(),
        };
        serde_json::to_vec(&wire)
            .map_err(|e| NativeStatus::new(status::ENCODE_FAILED, e.to_string()))
    }

    fn unwrap_received(&self, ctx: ContextHandle, wrapped: &[u8]) -> NativeResult<String> {
        let wire: WireMessage = serde_json::from_slice(wrapped)
            .map_err(|e| NativeStatus::new(status::DECODE_FAILED, e.to_string()))?;

        let max_history = self.options.max_causal_history;
        let (listener, events, response) = self.with_context(ctx, |state| {
            let channel_id = wire.channel_id.clone();
            let channel = state.channels.entry(channel_id.clone()).or_default();
            let mut events = Vec::new();

            // A peer's causal history acknowledges our outgoing messages.
            for dep in &wire.causal_history {
                if let Some(pos) = channel.unacked.iter().position(|id| id == &dep.message_id) {
                    channel.unacked.remove(pos);
                    events.push(SdsEvent::MessageSent {
                        message_id: dep.message_id.clone(),
                        channel_id: channel_id.clone(),
                    });
                }
            }

            let response = if channel.delivered.contains(&wire.message_id) {
                UnwrappedMessage {
                    message: Some(wire.content),
                    missing_deps: Some(Vec::new()),
                    channel_id: Some(channel_id),
                }
            } else {
                let missing = wire.unmet_dependencies(channel);
                if missing.is_empty() {
                    channel.lamport = channel.lamport.max(wire.lamport_timestamp);
                    channel.deliver(wire.message_id.clone(), max_history);
                    events.push(SdsEvent::MessageReady {
                        message_id: wire.message_id.clone(),
                        channel_id: channel_id.clone(),
                    });
                    channel.release_pending(&channel_id, max_history, &mut events);

                    UnwrappedMessage {
                        message: Some(wire.content),
                        missing_deps: Some(Vec::new()),
                        channel_id: Some(channel_id),
                    }
                } else {
                    events.push(SdsEvent::MissingDependencies {
                        message_id: wire.message_id.clone(),
                        missing_deps: missing.clone(),
                        channel_id: channel_id.clone(),
                    });
                    if !channel.pending.iter().any(|m| m.message_id == wire.message_id) {
                        channel.pending.push(wire);
                    }

                    UnwrappedMessage {
                        message: None,
                        missing_deps: Some(missing),
                        channel_id: Some(channel_id),
                    }
                }
            };

            Ok((state.listener.clone(), events, response))
        })?;

        Self::emit(listener.as_ref(), ctx, events);

        serde_json::to_string(&response)
            .map_err(|e| NativeStatus::new(status::ENCODE_FAILED, e.to_string()))
    }

    fn mark_dependencies_met(
        &self,
        ctx: ContextHandle,
        message_ids: &[MessageId],
        channel_id: &str,
    ) -> NativeResult<()> {
        let max_history = self.options.max_causal_history;
        let (listener, events) = self.with_context(ctx, |state| {
            let channel = state.channels.get_mut(channel_id).ok_or_else(|| {
                NativeStatus::new(
                    status::UNKNOWN_MESSAGE,
                    format!("no messages known on channel {}", channel_id),
                )
            })?;

            if let Some(unknown) = message_ids.iter().find(|id| !channel.is_known(id)) {
                return Err(NativeStatus::new(
                    status::UNKNOWN_MESSAGE,
                    format!("message {} is not known on channel {}", unknown, channel_id),
                ));
            }

            // A buffered message marked as met is no longer waited on.
            channel.pending.retain(|m| !message_ids.contains(&m.message_id));
            for id in message_ids {
                channel.deliver(id.clone(), max_history);
            }

            let mut events = Vec::new();
            channel.release_pending(channel_id, max_history, &mut events);
            Ok((state.listener.clone(), events))
        })?;

        Self::emit(listener.as_ref(), ctx, events);
        Ok(())
    }

    fn start_periodic_tasks(&self, ctx: ContextHandle) -> NativeResult<()> {
        let interval = self.options.sync_interval;
        self.with_context(ctx, |state| {
            if state.periodic.is_some() {
                return Err(NativeStatus::new(
                    status::ALREADY_STARTED,
                    "periodic tasks already started",
                ));
            }

            let runtime = runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(|e| NativeStatus::failure(format!("failed to start periodic tasks: {}", e)))?;

            let (stop, mut stopped) = oneshot::channel::<()>();
            let listener = state.listener.clone();
            let worker = thread::Builder::new()
                .name(format!("sds-periodic-{}", ctx))
                .spawn(move || {
                    runtime.block_on(async move {
                        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        loop {
                            tokio::select! {
                                _ = &mut stopped => break,
                                _ = ticker.tick() => {
                                    listener.on_event(ctx, &SdsEvent::PeriodicSync.to_json())
                                }
                            }
                        }
                    })
                })
                .map_err(|e| NativeStatus::failure(format!("failed to start periodic tasks: {}", e)))?;

            state.periodic = Some(PeriodicTask { stop, worker });
            Ok(())
        })
    }
}

impl std::fmt::Debug for MemoryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCore")
            .field("options", &self.options)
            .field("contexts", &lock(&self.contexts, "memory core").len())
            .finish()
    }
}
