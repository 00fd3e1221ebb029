//! The reliability manager façade.
//!
//! One [`ReliabilityManager`] owns one core context for its whole lifetime:
//!
//! ```text
//! builder().build()          cleanup() / drop
//!  ──────────────► Active ──────────────────► Closed
//!                  │    ▲
//!                  └────┘ reset()
//! ```
//!
//! Every operation except construction requires `Active`; on a closed
//! manager it fails with [`SdsError::Closed`] without touching the core.
//! `cleanup` does not cancel in-flight core calls on the same manager;
//! callers serialize the two.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info, warn, Dispatch};

use crate::callbacks::EventCallbacks;
use crate::config::SdsConfig;
use crate::dispatch::{dispatch, provide_hint};
use crate::error::{NativeResult, NativeStatus, Result, SdsError};
use crate::event::decode_event;
use crate::lock::{lock, read, write};
use crate::native::{ContextHandle, NativeCore};
use crate::queue::{DispatchMode, EventQueue, QueueRejection};
use crate::registry::ManagerRegistry;
use crate::types::{MessageId, UnwrappedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active(ContextHandle),
    Closed,
}

/// Per-manager log sink. Falls back to the ambient subscriber.
#[derive(Clone, Default)]
struct Logger(Option<Dispatch>);

impl Logger {
    fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.0 {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

/// Decodes and dispatches the events of one context.
struct EventHandler {
    ctx: ContextHandle,
    callbacks: RwLock<Arc<EventCallbacks>>,
    logger: Logger,
}

impl EventHandler {
    fn snapshot(&self) -> Arc<EventCallbacks> {
        read(&self.callbacks, "event callbacks").clone()
    }

    fn handle_payload(&self, payload: &str) {
        self.logger.scope(|| match decode_event(payload) {
            Ok(Some(event)) => {
                let callbacks = self.snapshot();
                dispatch(&event, &callbacks);
            }
            Ok(None) => debug!(ctx = %self.ctx, "ignoring unrecognized sds event type"),
            Err(e) => error!(ctx = %self.ctx, error = %e, "failed to parse sds event"),
        });
    }
}

pub(crate) struct ManagerShared {
    core: Arc<dyn NativeCore>,
    registry: Arc<ManagerRegistry>,
    state: RwLock<Lifecycle>,
    handler: Arc<EventHandler>,
    queue: Mutex<Option<EventQueue>>,
}

impl ManagerShared {
    /// Entry point for a payload the registry resolved to this manager.
    pub(crate) fn accept_event(&self, payload: &str) {
        if matches!(*read(&self.state, "manager state"), Lifecycle::Closed) {
            return;
        }

        // Hooks may call back into this manager, so never dispatch under the queue lock.
        let inline = {
            let queue = lock(&self.queue, "event queue");
            match queue.as_ref() {
                Some(queue) => {
                    if let Err(rejection) = queue.push(payload) {
                        self.log_rejection(rejection);
                    }
                    false
                }
                None => true,
            }
        };

        if inline {
            self.handler.handle_payload(payload);
        }
    }

    fn log_rejection(&self, rejection: QueueRejection) {
        let ctx = self.handler.ctx;
        self.handler.logger.scope(|| match rejection {
            QueueRejection::Full => warn!(ctx = %ctx, "sds event channel full, dropping event"),
            QueueRejection::Closed => {
                debug!(ctx = %ctx, "sds event channel closed, dropping event")
            }
        });
    }

    pub(crate) fn report_callback_error(&self, code: i32, message: &str) {
        let ctx = self.handler.ctx;
        self.handler.logger.scope(|| {
            error!(ctx = %ctx, ret_code = code, err_msg = message, "sds callback error")
        });
    }

    pub(crate) fn retrieval_hint(&self, message_id: &MessageId) -> Vec<u8> {
        let callbacks = self.handler.snapshot();
        self.handler
            .logger
            .scope(|| provide_hint(&callbacks, message_id))
    }

    fn active_context(&self) -> Result<ContextHandle> {
        match *read(&self.state, "manager state") {
            Lifecycle::Active(ctx) => Ok(ctx),
            Lifecycle::Closed => Err(SdsError::Closed),
        }
    }

    fn close(&self) -> Result<()> {
        let ctx = {
            let mut state = write(&self.state, "manager state");
            match *state {
                Lifecycle::Active(ctx) => {
                    *state = Lifecycle::Closed;
                    ctx
                }
                Lifecycle::Closed => return Err(SdsError::Closed),
            }
        };

        self.registry.unregister(ctx, self);

        let queue = lock(&self.queue, "event queue").take();
        if let Some(queue) = queue {
            queue.close();
        }

        release_context(self.core.as_ref(), ctx, &self.handler.logger)
            .map_err(|status| SdsError::native("cleanup", status))
    }
}

/// Destroy `ctx` on `core`, logging the outcome through `logger`.
fn release_context(core: &dyn NativeCore, ctx: ContextHandle, logger: &Logger) -> NativeResult<()> {
    let released = core.destroy_context(ctx);
    logger.scope(|| match &released {
        Ok(()) => info!(ctx = %ctx, "sds context released"),
        Err(status) => error!(ctx = %ctx, %status, "failed to release sds context"),
    });
    released
}

/// Builder for [`ReliabilityManager`].
pub struct ManagerBuilder {
    core: Arc<dyn NativeCore>,
    registry: Option<Arc<ManagerRegistry>>,
    logger: Option<Dispatch>,
    dispatch_mode: DispatchMode,
}

impl ManagerBuilder {
    /// Register in `registry` instead of [`ManagerRegistry::global`].
    pub fn registry(mut self, registry: Arc<ManagerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Route this manager's diagnostics to `dispatch`.
    pub fn logger(mut self, dispatch: Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn config(self, config: &SdsConfig) -> Self {
        self.dispatch_mode(config.dispatch_mode)
    }

    /// Allocate a context and register the manager.
    pub fn build(self) -> Result<ReliabilityManager> {
        let registry = self.registry.unwrap_or_else(ManagerRegistry::global);
        let logger = Logger(self.logger);

        let ctx = self
            .core
            .create_context(registry.clone())
            .map_err(SdsError::Construction)?;

        let handler = Arc::new(EventHandler {
            ctx,
            callbacks: RwLock::new(Arc::new(EventCallbacks::default())),
            logger: logger.clone(),
        });

        let queue = match self.dispatch_mode {
            DispatchMode::Inline => None,
            DispatchMode::Queued { capacity } => {
                let worker = handler.clone();
                match EventQueue::spawn(format!("sds-events-{}", ctx), capacity, move |payload| {
                    worker.handle_payload(&payload)
                }) {
                    Ok(queue) => Some(queue),
                    Err(e) => {
                        let _ = release_context(self.core.as_ref(), ctx, &logger);
                        return Err(SdsError::Worker(e));
                    }
                }
            }
        };

        let shared = Arc::new(ManagerShared {
            core: self.core,
            registry: registry.clone(),
            state: RwLock::new(Lifecycle::Active(ctx)),
            handler,
            queue: Mutex::new(queue),
        });

        if !registry.register(ctx, &shared) {
            // The handle belongs to a live manager; its context is not ours to release.
            let queue = lock(&shared.queue, "event queue").take();
            if let Some(queue) = queue {
                queue.close();
            }
            logger.scope(|| {
                warn!(ctx = %ctx, "sds context already registered, keeping existing entry")
            });
            return Err(SdsError::Construction(NativeStatus::failure(format!(
                "context {} is already registered",
                ctx
            ))));
        }
        logger.scope(|| info!(ctx = %ctx, mode = ?self.dispatch_mode, "reliability manager created"));

        Ok(ReliabilityManager { shared })
    }
}

/// One reliability-manager instance bound to one core context.
///
/// ```ignore
/// let manager = ReliabilityManager::new(core)?;
/// manager.register_callbacks(
///     EventCallbacks::new().on_message_ready(|id, channel| deliver(id, channel)),
/// )?;
///
/// let wire = manager.wrap_outgoing_message(b"hello", &MessageId::generate(), "chat")?;
/// let unwrapped = peer.unwrap_received_message(&wire)?;
/// ```
pub struct ReliabilityManager {
    pub(crate) shared: Arc<ManagerShared>,
}

impl ReliabilityManager {
    /// Create a manager registered in the global registry.
    pub fn new(core: Arc<dyn NativeCore>) -> Result<Self> {
        Self::builder(core).build()
    }

    pub fn builder(core: Arc<dyn NativeCore>) -> ManagerBuilder {
        ManagerBuilder {
            core,
            registry: None,
            logger: None,
            dispatch_mode: DispatchMode::default(),
        }
    }

    /// Handle of the owned context, `None` once closed.
    pub fn context_handle(&self) -> Option<ContextHandle> {
        self.shared.active_context().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.context_handle().is_none()
    }

    /// Replace the callback set wholesale.
    ///
    /// Events dispatched after this returns see the new set; an event already
    /// being dispatched finishes with the set it started with.
    pub fn register_callbacks(&self, callbacks: EventCallbacks) -> Result<()> {
        self.shared.active_context()?;
        *write(&self.shared.handler.callbacks, "event callbacks") = Arc::new(callbacks);
        Ok(())
    }

    /// Attach causal-dependency metadata to `message`.
    pub fn wrap_outgoing_message(
        &self,
        message: &[u8],
        message_id: &MessageId,
        channel_id: &str,
    ) -> Result<Vec<u8>> {
        let ctx = self.shared.active_context()?;
        self.shared
            .core
            .wrap_outgoing(ctx, message, message_id, channel_id)
            .map_err(|status| SdsError::native("wrap", status))
    }

    /// Strip causal metadata and report unmet dependencies.
    pub fn unwrap_received_message(&self, message: &[u8]) -> Result<UnwrappedMessage> {
        let ctx = self.shared.active_context()?;
        let response = self
            .shared
            .core
            .unwrap_received(ctx, message)
            .map_err(|status| SdsError::native("unwrap", status))?;

        serde_json::from_str(&response).map_err(|source| SdsError::InvalidResponse {
            operation: "unwrap",
            source,
        })
    }

    /// Tell the core `message_ids` are now available locally.
    ///
    /// Messages this unblocks surface through `on_message_ready` events, not
    /// through the return value.
    pub fn mark_dependencies_met(&self, message_ids: &[MessageId], channel_id: &str) -> Result<()> {
        let ctx = self.shared.active_context()?;
        self.shared
            .core
            .mark_dependencies_met(ctx, message_ids, channel_id)
            .map_err(|status| SdsError::native("mark dependencies met", status))
    }

    /// Start the core's periodic maintenance. Call once per manager.
    pub fn start_periodic_tasks(&self) -> Result<()> {
        let ctx = self.shared.active_context()?;
        self.shared
            .core
            .start_periodic_tasks(ctx)
            .map_err(|status| SdsError::native("start periodic tasks", status))
    }

    /// Clear the core's state for this manager. The manager stays usable.
    pub fn reset(&self) -> Result<()> {
        let ctx = self.shared.active_context()?;
        self.shared
            .core
            .reset(ctx)
            .map_err(|status| SdsError::native("reset", status))
    }

    /// Unregister and release the context. Every later call fails with
    /// [`SdsError::Closed`].
    pub fn cleanup(&self) -> Result<()> {
        self.shared.close()
    }
}

impl Drop for ReliabilityManager {
    fn drop(&mut self) {
        match self.shared.close() {
            Ok(()) | Err(SdsError::Closed) => {}
            Err(e) => warn!(error = %e, "reliability manager dropped with a failed release"),
        }
    }
}

impl std::fmt::Debug for ReliabilityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliabilityManager")
            .field("state", &*read(&self.shared.state, "manager state"))
            .finish_non_exhaustive()
    }
}
