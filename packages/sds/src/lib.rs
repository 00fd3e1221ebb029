//! # sds
//!
//! Managed-side bridge to a Scalable Data Sync reliability core.
//!
//! The core computes causal dependencies, retransmission and delivery order.
//! This crate correlates the core's opaque context handles with
//! [`ReliabilityManager`] instances, decodes the core's tagged JSON events,
//! and invokes user callbacks with ordering and error isolation.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► ReliabilityManager ──► NativeCore
//!                    ▲                  │
//!                    │ resolve(ctx)     │ on_event(ctx, json)
//!             ManagerRegistry ◄─────────┘
//!                    │
//!                    ▼
//!          decode_event ──► dispatch ──► EventCallbacks
//! ```
//!
//! ## Error Boundary
//!
//! - Façade operations return [`SdsError`] to their caller
//! - Inbound failures (bad payloads, unknown handles, panicking hooks) are
//!   logged and the event is dropped; nothing unwinds into the core
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sds::{EventCallbacks, MemoryCore, MessageId, ReliabilityManager};
//!
//! let core = Arc::new(MemoryCore::new());
//! let alice = ReliabilityManager::new(core.clone())?;
//! let bob = ReliabilityManager::new(core)?;
//!
//! bob.register_callbacks(
//!     EventCallbacks::new().on_message_ready(|id, channel| println!("{id} ready on {channel}")),
//! )?;
//!
//! let wire = alice.wrap_outgoing_message(b"hello", &MessageId::generate(), "general")?;
//! let unwrapped = bob.unwrap_received_message(&wire)?;
//! assert_eq!(unwrapped.message.as_deref(), Some(&b"hello"[..]));
//! ```

mod callbacks;
mod config;
mod dispatch;
mod error;
mod event;
mod lock;
mod manager;
mod native;
mod queue;
mod registry;
mod types;

pub mod ffi;
pub mod memory_core;

pub use crate::callbacks::{
    EventCallbacks, MessageHook, MissingDepsHook, PeriodicSyncHook, RetrievalHintProvider,
};
pub use crate::config::SdsConfig;
pub use crate::dispatch::{dispatch, provide_hint, DispatchOutcome};
pub use crate::error::{ConfigError, EventDecodeError, NativeResult, NativeStatus, Result, SdsError};
pub use crate::event::{
    decode_event, SdsEvent, MESSAGE_READY, MESSAGE_SENT, MISSING_DEPENDENCIES, PERIODIC_SYNC,
};
pub use crate::manager::{ManagerBuilder, ReliabilityManager};
pub use crate::memory_core::{MemoryCore, MemoryCoreOptions};
pub use crate::native::{ContextHandle, EventListener, NativeCore};
pub use crate::queue::{DispatchMode, EVENT_CHANNEL_CAPACITY};
pub use crate::registry::ManagerRegistry;
pub use crate::types::{HistoryEntry, MessageId, UnwrappedMessage};
