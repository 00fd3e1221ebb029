//! The two call surfaces between this bridge and a reliability core.
//!
//! ```text
//! caller ─► ReliabilityManager ─► NativeCore            (managed → native)
//! core   ─► EventListener (ManagerRegistry) ─► manager  (native → managed)
//! ```
//!
//! A core is handed its listener when a context is created, mirroring how a
//! native library receives a C callback pointer plus user data. Every
//! managed-to-native call is synchronous and reports failure as a
//! [`NativeStatus`].

use std::fmt;
use std::sync::Arc;

use crate::error::NativeResult;
use crate::types::MessageId;

/// Opaque token identifying one core context.
///
/// Used purely for correlation. Never dereferenced by this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(usize);

impl ContextHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextHandle({:#x})", self.0)
    }
}

/// Native-to-managed entry points.
///
/// A core may call these from any thread it manages, including from inside a
/// managed-to-native call currently in progress.
pub trait EventListener: Send + Sync {
    /// Deliver one JSON event payload for `ctx`.
    fn on_event(&self, ctx: ContextHandle, payload: &str);

    /// Report that a native-side callback invocation failed. Diagnostic only.
    fn on_callback_error(&self, ctx: ContextHandle, code: i32, message: &str);

    /// Ask the managed side for the retrieval hint of `message_id`.
    fn retrieval_hint(&self, ctx: ContextHandle, message_id: &MessageId) -> Vec<u8>;
}

/// Managed-to-native call surface of a reliability core.
pub trait NativeCore: Send + Sync + 'static {
    /// Allocate a fresh context whose events are reported to `listener`.
    fn create_context(&self, listener: Arc<dyn EventListener>) -> NativeResult<ContextHandle>;

    /// Release a context. Must be called exactly once per handle.
    fn destroy_context(&self, ctx: ContextHandle) -> NativeResult<()>;

    /// Clear the context's internal state, keeping it allocated.
    fn reset(&self, ctx: ContextHandle) -> NativeResult<()>;

    /// Attach causal metadata to `payload`.
    fn wrap_outgoing(
        &self,
        ctx: ContextHandle,
        payload: &[u8],
        message_id: &MessageId,
        channel_id: &str,
    ) -> NativeResult<Vec<u8>>;

    /// Strip causal metadata from `wrapped`; returns the JSON encoding of an
    /// [`UnwrappedMessage`](crate::UnwrappedMessage).
    fn unwrap_received(&self, ctx: ContextHandle, wrapped: &[u8]) -> NativeResult<String>;

    /// Acknowledge that `message_ids` are now locally available on `channel_id`.
    fn mark_dependencies_met(
        &self,
        ctx: ContextHandle,
        message_ids: &[MessageId],
        channel_id: &str,
    ) -> NativeResult<()>;

    /// Begin the core's periodic maintenance for this context.
    fn start_periodic_tasks(&self, ctx: ContextHandle) -> NativeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trips_raw_value() {
        let handle = ContextHandle::from_raw(0xdead);
        assert_eq!(handle.as_raw(), 0xdead);
        assert_eq!(handle.to_string(), "0xdead");
        assert_eq!(format!("{:?}", handle), "ContextHandle(0xdead)");
    }
}
