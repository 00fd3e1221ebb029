//! Process-wide map from core context handle to manager.
//!
//! A core reports every event through one listener, tagged only with the
//! context handle. The registry turns that handle back into the manager that
//! owns it. Entries are weak back-references: the registry never keeps a
//! manager (or its context) alive.
//!
//! Register, unregister and resolve share one mutex, so a resolve never sees
//! a half-registered or half-removed entry. A handle that does not resolve is
//! logged and its event dropped.

use std::collections::HashMap;
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::warn;

use crate::lock::lock;
use crate::manager::ManagerShared;
use crate::native::{ContextHandle, EventListener};
use crate::types::MessageId;

static GLOBAL: OnceLock<Arc<ManagerRegistry>> = OnceLock::new();

#[derive(Default)]
pub struct ManagerRegistry {
    entries: Mutex<HashMap<ContextHandle, Weak<ManagerShared>>>,
}

impl ManagerRegistry {
    /// Create an isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use and never torn down.
    pub fn global() -> Arc<ManagerRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(ManagerRegistry::new()))
            .clone()
    }

    /// Insert `manager` under `ctx` unless a live entry already holds it.
    ///
    /// Returns false when the handle was already taken.
    pub(crate) fn register(&self, ctx: ContextHandle, manager: &Arc<ManagerShared>) -> bool {
        let mut entries = lock(&self.entries, "manager registry");
        match entries.get(&ctx) {
            Some(existing) if existing.strong_count() > 0 => false,
            _ => {
                entries.insert(ctx, Arc::downgrade(manager));
                true
            }
        }
    }

    /// Remove the entry for `ctx` if it belongs to `manager` (or is dead).
    pub(crate) fn unregister(&self, ctx: ContextHandle, manager: &ManagerShared) {
        let mut entries = lock(&self.entries, "manager registry");
        let owned = entries
            .get(&ctx)
            .is_some_and(|existing| existing.strong_count() == 0 || ptr::eq(existing.as_ptr(), manager));
        if owned {
            entries.remove(&ctx);
        }
    }

    pub(crate) fn resolve(&self, ctx: ContextHandle) -> Option<Arc<ManagerShared>> {
        let mut entries = lock(&self.entries, "manager registry");
        let manager = entries.get(&ctx)?.upgrade();
        if manager.is_none() {
            entries.remove(&ctx);
        }
        manager
    }

    pub fn contains(&self, ctx: ContextHandle) -> bool {
        lock(&self.entries, "manager registry")
            .get(&ctx)
            .is_some_and(|m| m.strong_count() > 0)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries, "manager registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventListener for ManagerRegistry {
    fn on_event(&self, ctx: ContextHandle, payload: &str) {
        match self.resolve(ctx) {
            Some(manager) => manager.accept_event(payload),
            None => warn!(ctx = %ctx, "dropping sds event for unknown reliability manager"),
        }
    }

    fn on_callback_error(&self, ctx: ContextHandle, code: i32, message: &str) {
        match self.resolve(ctx) {
            Some(manager) => manager.report_callback_error(code, message),
            None => warn!(
                ctx = %ctx,
                ret_code = code,
                err_msg = message,
                "sds callback error for unknown reliability manager"
            ),
        }
    }

    fn retrieval_hint(&self, ctx: ContextHandle, message_id: &MessageId) -> Vec<u8> {
        match self.resolve(ctx) {
            Some(manager) => manager.retrieval_hint(message_id),
            None => {
                warn!(ctx = %ctx, message_id = %message_id, "hint requested for unknown reliability manager");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
