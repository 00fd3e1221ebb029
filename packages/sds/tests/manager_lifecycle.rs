//! End-to-end tests for manager operations over the in-process core.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sds::memory_core::status;
use sds::{
    ContextHandle, EventCallbacks, EventListener, HistoryEntry, ManagerRegistry, MemoryCore,
    MemoryCoreOptions, MessageId, NativeCore, NativeResult, NativeStatus, ReliabilityManager,
    SdsError,
};

const CHANNEL: &str = "general";

// =============================================================================
// Helpers
// =============================================================================

struct Peers {
    core: Arc<MemoryCore>,
    registry: Arc<ManagerRegistry>,
    alice: ReliabilityManager,
    bob: ReliabilityManager,
}

fn peers() -> Peers {
    peers_with(MemoryCoreOptions::default())
}

fn peers_with(options: MemoryCoreOptions) -> Peers {
    let core = Arc::new(MemoryCore::with_options(options));
    let registry = Arc::new(ManagerRegistry::new());
    let build = || {
        ReliabilityManager::builder(core.clone())
            .registry(registry.clone())
            .build()
            .unwrap()
    };
    let alice = build();
    let bob = build();
    Peers {
        core,
        registry,
        alice,
        bob,
    }
}

type Seen = Arc<Mutex<Vec<(String, String)>>>;

fn record_ready(manager: &ReliabilityManager) -> Seen {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    manager
        .register_callbacks(EventCallbacks::new().on_message_ready(move |id, channel| {
            sink.lock().unwrap().push((id.into_inner(), channel));
        }))
        .unwrap();
    seen
}

/// A core whose every call fails.
struct FailingCore;

impl NativeCore for FailingCore {
    fn create_context(&self, _listener: Arc<dyn EventListener>) -> NativeResult<ContextHandle> {
        Err(NativeStatus::new(9, "out of contexts"))
    }

    fn destroy_context(&self, _ctx: ContextHandle) -> NativeResult<()> {
        Err(NativeStatus::failure("unreachable"))
    }

    fn reset(&self, _ctx: ContextHandle) -> NativeResult<()> {
        Err(NativeStatus::failure("unreachable"))
    }

    fn wrap_outgoing(
        &self,
        _ctx: ContextHandle,
        _payload: &[u8],
        _message_id: &MessageId,
        _channel_id: &str,
    ) -> NativeResult<Vec<u8>> {
        Err(NativeStatus::failure("unreachable"))
    }

    fn unwrap_received(&self, _ctx: ContextHandle, _wrapped: &[u8]) -> NativeResult<String> {
        Err(NativeStatus::failure("unreachable"))
    }

    fn mark_dependencies_met(
        &self,
        _ctx: ContextHandle,
        _message_ids: &[MessageId],
        _channel_id: &str,
    ) -> NativeResult<()> {
        Err(NativeStatus::failure("unreachable"))
    }

    fn start_periodic_tasks(&self, _ctx: ContextHandle) -> NativeResult<()> {
        Err(NativeStatus::failure("unreachable"))
    }
}

/// A core that answers unwrap with a fixed response.
struct CannedCore {
    inner: MemoryCore,
    response: String,
}

impl NativeCore for CannedCore {
    fn create_context(&self, listener: Arc<dyn EventListener>) -> NativeResult<ContextHandle> {
        self.inner.create_context(listener)
    }

    fn destroy_context(&self, ctx: ContextHandle) -> NativeResult<()> {
        self.inner.destroy_context(ctx)
    }

    fn reset(&self, ctx: ContextHandle) -> NativeResult<()> {
        self.inner.reset(ctx)
    }

    fn wrap_outgoing(
        &self,
        ctx: ContextHandle,
        payload: &[u8],
        message_id: &MessageId,
        channel_id: &str,
    ) -> NativeResult<Vec<u8>> {
        self.inner.wrap_outgoing(ctx, payload, message_id, channel_id)
    }

    fn unwrap_received(&self, _ctx: ContextHandle, _wrapped: &[u8]) -> NativeResult<String> {
        Ok(self.response.clone())
    }

    fn mark_dependencies_met(
        &self,
        ctx: ContextHandle,
        message_ids: &[MessageId],
        channel_id: &str,
    ) -> NativeResult<()> {
        self.inner.mark_dependencies_met(ctx, message_ids, channel_id)
    }

    fn start_periodic_tasks(&self, ctx: ContextHandle) -> NativeResult<()> {
        self.inner.start_periodic_tasks(ctx)
    }
}

/// A core that hands out the same handle for every context.
struct FixedHandleCore {
    handle: ContextHandle,
    destroyed: AtomicUsize,
}

impl NativeCore for FixedHandleCore {
    fn create_context(&self, _listener: Arc<dyn EventListener>) -> NativeResult<ContextHandle> {
        Ok(self.handle)
    }

    fn destroy_context(&self, _ctx: ContextHandle) -> NativeResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&self, _ctx: ContextHandle) -> NativeResult<()> {
        Ok(())
    }

    fn wrap_outgoing(
        &self,
        _ctx: ContextHandle,
        payload: &[u8],
        _message_id: &MessageId,
        _channel_id: &str,
    ) -> NativeResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn unwrap_received(&self, _ctx: ContextHandle, _wrapped: &[u8]) -> NativeResult<String> {
        Ok("{}".to_string())
    }

    fn mark_dependencies_met(
        &self,
        _ctx: ContextHandle,
        _message_ids: &[MessageId],
        _channel_id: &str,
    ) -> NativeResult<()> {
        Ok(())
    }

    fn start_periodic_tasks(&self, _ctx: ContextHandle) -> NativeResult<()> {
        Ok(())
    }
}

// =============================================================================
// Construction and cleanup
// =============================================================================

#[test]
fn test_duplicate_handle_fails_construction_and_keeps_owner() {
    let registry = Arc::new(ManagerRegistry::new());
    let core = Arc::new(FixedHandleCore {
        handle: ContextHandle::from_raw(0x5d5_0001),
        destroyed: AtomicUsize::new(0),
    });

    let owner = ReliabilityManager::builder(core.clone())
        .registry(registry.clone())
        .build()
        .unwrap();
    let ctx = owner.context_handle().unwrap();

    let err = ReliabilityManager::builder(core.clone())
        .registry(registry.clone())
        .build()
        .unwrap_err();
    assert!(matches!(err, SdsError::Construction(_)));

    // The owner's entry and context survive the failed build.
    assert!(registry.contains(ctx));
    assert_eq!(core.destroyed.load(Ordering::SeqCst), 0);
    assert!(owner.reset().is_ok());

    owner.cleanup().unwrap();
    assert!(registry.is_empty());
    assert_eq!(core.destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_construction_failure_surfaces_status() {
    let registry = Arc::new(ManagerRegistry::new());
    let err = ReliabilityManager::builder(Arc::new(FailingCore))
        .registry(registry.clone())
        .build()
        .unwrap_err();

    match err {
        SdsError::Construction(status) => {
            assert_eq!(status.code, 9);
            assert_eq!(status.message, "out of contexts");
        }
        other => panic!("expected construction error, got {:?}", other),
    }
    assert!(registry.is_empty());
}

#[test]
fn test_cleanup_unregisters_and_closes() {
    let Peers {
        registry, alice, ..
    } = peers();
    let ctx = alice.context_handle().unwrap();
    assert!(registry.contains(ctx));

    alice.cleanup().unwrap();

    assert!(alice.is_closed());
    assert!(alice.context_handle().is_none());
    assert!(!registry.contains(ctx));
}

#[test]
fn test_operations_after_cleanup_fail_closed() {
    let Peers { alice, .. } = peers();
    let id = MessageId::new("m1");
    let wire = alice.wrap_outgoing_message(b"hi", &id, CHANNEL).unwrap();
    alice.cleanup().unwrap();

    assert!(matches!(
        alice.wrap_outgoing_message(b"again", &id, CHANNEL),
        Err(SdsError::Closed)
    ));
    assert!(matches!(alice.unwrap_received_message(&wire), Err(SdsError::Closed)));
    assert!(matches!(
        alice.mark_dependencies_met(&[id], CHANNEL),
        Err(SdsError::Closed)
    ));
    assert!(matches!(alice.start_periodic_tasks(), Err(SdsError::Closed)));
    assert!(matches!(alice.reset(), Err(SdsError::Closed)));
    assert!(matches!(
        alice.register_callbacks(EventCallbacks::new()),
        Err(SdsError::Closed)
    ));
    assert!(matches!(alice.cleanup(), Err(SdsError::Closed)));
}

#[test]
fn test_drop_releases_the_context() {
    let registry = Arc::new(ManagerRegistry::new());
    let core = Arc::new(MemoryCore::new());
    let manager = ReliabilityManager::builder(core.clone())
        .registry(registry.clone())
        .build()
        .unwrap();
    let ctx = manager.context_handle().unwrap();

    drop(manager);

    assert!(!registry.contains(ctx));
    // The core no longer knows the handle.
    assert!(core.reset(ctx).is_err());
}

#[test]
fn test_new_registers_in_global_registry() {
    let manager = ReliabilityManager::new(Arc::new(MemoryCore::new())).unwrap();
    let ctx = manager.context_handle().unwrap();
    assert!(ManagerRegistry::global().contains(ctx));

    manager.cleanup().unwrap();
    assert!(!ManagerRegistry::global().contains(ctx));
}

// =============================================================================
// Wrap / unwrap
// =============================================================================

#[test]
fn test_wrap_then_unwrap_yields_payload() {
    let Peers { alice, bob, .. } = peers();
    let ready = record_ready(&bob);

    let wire = alice
        .wrap_outgoing_message(b"hello", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    let unwrapped = bob.unwrap_received_message(&wire).unwrap();

    assert_eq!(unwrapped.message.as_deref(), Some(&b"hello"[..]));
    assert!(unwrapped.missing_deps().is_empty());
    assert_eq!(unwrapped.channel_id.as_deref(), Some(CHANNEL));
    assert!(!unwrapped.is_buffered());
    assert_eq!(
        *ready.lock().unwrap(),
        vec![("m1".to_string(), CHANNEL.to_string())]
    );
}

#[test]
fn test_unmet_dependency_is_reported_with_hint() {
    let Peers { alice, bob, .. } = peers();
    alice
        .register_callbacks(
            EventCallbacks::new().retrieval_hint_provider(|id| format!("store/{}", id).into_bytes()),
        )
        .unwrap();

    let missing: Arc<Mutex<Vec<(String, Vec<HistoryEntry>)>>> = Arc::default();
    let sink = missing.clone();
    bob.register_callbacks(EventCallbacks::new().on_missing_dependencies(
        move |id, deps, _| sink.lock().unwrap().push((id.into_inner(), deps)),
    ))
    .unwrap();

    let _m1 = alice
        .wrap_outgoing_message(b"first", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    let m2 = alice
        .wrap_outgoing_message(b"second", &MessageId::new("m2"), CHANNEL)
        .unwrap();

    let unwrapped = bob.unwrap_received_message(&m2).unwrap();

    let expected = vec![HistoryEntry::new("m1", b"store/m1".to_vec())];
    assert_eq!(unwrapped.missing_deps(), expected.as_slice());
    assert!(unwrapped.is_buffered());
    assert_eq!(
        *missing.lock().unwrap(),
        vec![("m2".to_string(), expected)]
    );
}

#[test]
fn test_missing_hint_provider_yields_empty_hint() {
    let Peers { alice, bob, .. } = peers();

    alice
        .wrap_outgoing_message(b"first", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    let m2 = alice
        .wrap_outgoing_message(b"second", &MessageId::new("m2"), CHANNEL)
        .unwrap();

    let unwrapped = bob.unwrap_received_message(&m2).unwrap();
    assert_eq!(unwrapped.missing_deps(), &[HistoryEntry::new("m1", Vec::new())]);
}

#[test]
fn test_out_of_order_delivery_releases_buffered_message() {
    let Peers {
        core, alice, bob, ..
    } = peers();
    let ready = record_ready(&bob);

    let m1 = alice
        .wrap_outgoing_message(b"first", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    let m2 = alice
        .wrap_outgoing_message(b"second", &MessageId::new("m2"), CHANNEL)
        .unwrap();

    bob.unwrap_received_message(&m2).unwrap();
    assert_eq!(core.pending_count(bob.context_handle().unwrap(), CHANNEL), 1);
    assert!(ready.lock().unwrap().is_empty());

    let first = bob.unwrap_received_message(&m1).unwrap();
    assert_eq!(first.message.as_deref(), Some(&b"first"[..]));

    let ids: Vec<String> = ready.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(core.pending_count(bob.context_handle().unwrap(), CHANNEL), 0);
}

#[test]
fn test_mark_dependencies_met_releases_via_ready_event() {
    let Peers { alice, bob, .. } = peers();
    let ready = record_ready(&bob);

    alice
        .wrap_outgoing_message(b"first", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    let m2 = alice
        .wrap_outgoing_message(b"second", &MessageId::new("m2"), CHANNEL)
        .unwrap();

    let buffered = bob.unwrap_received_message(&m2).unwrap();
    assert!(buffered.is_buffered());

    // m1 was fetched out of band using its retrieval hint.
    bob.mark_dependencies_met(&[MessageId::new("m1")], CHANNEL)
        .unwrap();

    assert_eq!(
        *ready.lock().unwrap(),
        vec![("m2".to_string(), CHANNEL.to_string())]
    );
}

#[test]
fn test_mark_unknown_dependency_is_a_native_error() {
    let Peers { bob, .. } = peers();

    let err = bob
        .mark_dependencies_met(&[MessageId::new("ghost")], CHANNEL)
        .unwrap_err();

    assert_eq!(err.status().map(|s| s.code), Some(status::UNKNOWN_MESSAGE));
    assert!(err.is_retryable());
}

#[test]
fn test_acknowledgement_emits_message_sent() {
    let Peers { alice, bob, .. } = peers();
    let sent = Arc::new(AtomicUsize::new(0));
    let counter = sent.clone();
    alice
        .register_callbacks(EventCallbacks::new().on_message_sent(move |id, channel| {
            assert_eq!(id.as_str(), "m1");
            assert_eq!(channel, CHANNEL);
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    let m1 = alice
        .wrap_outgoing_message(b"ping", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    bob.unwrap_received_message(&m1).unwrap();
    let reply = bob
        .wrap_outgoing_message(b"pong", &MessageId::new("r1"), CHANNEL)
        .unwrap();
    alice.unwrap_received_message(&reply).unwrap();

    assert_eq!(sent.load(Ordering::SeqCst), 1);
}

#[test]
fn test_malformed_wire_bytes_are_a_native_error() {
    let Peers { bob, .. } = peers();

    let err = bob.unwrap_received_message(b"\x00garbage").unwrap_err();
    assert_eq!(err.status().map(|s| s.code), Some(status::DECODE_FAILED));
}

#[test]
fn test_invalid_unwrap_response_is_reported() {
    let registry = Arc::new(ManagerRegistry::new());
    let core = CannedCore {
        inner: MemoryCore::new(),
        response: "{not json".to_string(),
    };
    let manager = ReliabilityManager::builder(Arc::new(core))
        .registry(registry)
        .build()
        .unwrap();

    let err = manager.unwrap_received_message(b"anything").unwrap_err();
    assert!(matches!(
        err,
        SdsError::InvalidResponse {
            operation: "unwrap",
            ..
        }
    ));
}

#[test]
fn test_sparse_unwrap_response_is_accepted() {
    let registry = Arc::new(ManagerRegistry::new());
    let core = CannedCore {
        inner: MemoryCore::new(),
        response: r#"{"missingDeps":null}"#.to_string(),
    };
    let manager = ReliabilityManager::builder(Arc::new(core))
        .registry(registry)
        .build()
        .unwrap();

    let unwrapped = manager.unwrap_received_message(b"anything").unwrap();
    assert!(unwrapped.message.is_none());
    assert!(unwrapped.missing_deps().is_empty());
    assert!(unwrapped.channel_id.is_none());
}

// =============================================================================
// Reset and periodic tasks
// =============================================================================

#[test]
fn test_reset_keeps_manager_usable() {
    let Peers {
        core, alice, bob, ..
    } = peers();

    alice
        .wrap_outgoing_message(b"first", &MessageId::new("m1"), CHANNEL)
        .unwrap();
    let m2 = alice
        .wrap_outgoing_message(b"second", &MessageId::new("m2"), CHANNEL)
        .unwrap();
    bob.unwrap_received_message(&m2).unwrap();
    let bob_ctx = bob.context_handle().unwrap();
    assert_eq!(core.pending_count(bob_ctx, CHANNEL), 1);

    bob.reset().unwrap();

    assert!(!bob.is_closed());
    assert_eq!(bob.context_handle(), Some(bob_ctx));
    assert_eq!(core.pending_count(bob_ctx, CHANNEL), 0);

    let fresh = alice
        .wrap_outgoing_message(b"third", &MessageId::new("m3"), "other")
        .unwrap();
    let unwrapped = bob.unwrap_received_message(&fresh).unwrap();
    assert_eq!(unwrapped.message.as_deref(), Some(&b"third"[..]));
}

#[test]
fn test_periodic_tasks_emit_sync_until_cleanup() {
    let Peers { alice, .. } = peers_with(MemoryCoreOptions {
        sync_interval: Duration::from_millis(10),
        ..MemoryCoreOptions::default()
    });
    let syncs = Arc::new(AtomicUsize::new(0));
    let counter = syncs.clone();
    alice
        .register_callbacks(EventCallbacks::new().on_periodic_sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    alice.start_periodic_tasks().unwrap();
    let err = alice.start_periodic_tasks().unwrap_err();
    assert_eq!(err.status().map(|s| s.code), Some(status::ALREADY_STARTED));

    let start = Instant::now();
    while syncs.load(Ordering::SeqCst) < 2 && start.elapsed() < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(syncs.load(Ordering::SeqCst) >= 2);

    alice.cleanup().unwrap();
    let after_cleanup = syncs.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(syncs.load(Ordering::SeqCst), after_cleanup);
}
