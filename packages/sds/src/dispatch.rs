//! Invokes the registered hook for a decoded event.
//!
//! Hooks run synchronously on the dispatching thread. A panicking hook is
//! caught here and reported as [`DispatchOutcome::Panicked`]; it never
//! unwinds into the decoder, the registry or the core that delivered the
//! event.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::callbacks::EventCallbacks;
use crate::event::SdsEvent;
use crate::types::MessageId;

/// What dispatching one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The matching hook ran to completion.
    Invoked,
    /// No hook is registered for this event.
    NoHandler,
    /// The hook panicked; carries the panic message.
    Panicked(String),
}

/// Invoke the hook matching `event`, if one is set.
///
/// Fields are passed by value so the hook may keep them.
pub fn dispatch(event: &SdsEvent, callbacks: &EventCallbacks) -> DispatchOutcome {
    let invoke: Box<dyn FnOnce() + '_> = match event {
        SdsEvent::MessageReady {
            message_id,
            channel_id,
        } => match &callbacks.on_message_ready {
            Some(hook) => Box::new(move || hook(message_id.clone(), channel_id.clone())),
            None => return DispatchOutcome::NoHandler,
        },
        SdsEvent::MessageSent {
            message_id,
            channel_id,
        } => match &callbacks.on_message_sent {
            Some(hook) => Box::new(move || hook(message_id.clone(), channel_id.clone())),
            None => return DispatchOutcome::NoHandler,
        },
        SdsEvent::MissingDependencies {
            message_id,
            missing_deps,
            channel_id,
        } => match &callbacks.on_missing_dependencies {
            Some(hook) => Box::new(move || {
                hook(message_id.clone(), missing_deps.clone(), channel_id.clone())
            }),
            None => return DispatchOutcome::NoHandler,
        },
        SdsEvent::PeriodicSync => match &callbacks.on_periodic_sync {
            Some(hook) => Box::new(move || hook()),
            None => return DispatchOutcome::NoHandler,
        },
    };

    match catch_unwind(AssertUnwindSafe(invoke)) {
        Ok(()) => DispatchOutcome::Invoked,
        Err(panic_info) => {
            let panic_msg = extract_panic_message(&panic_info);
            error!(
                event_type = event.event_type(),
                panic = %panic_msg,
                "sds callback panicked"
            );
            DispatchOutcome::Panicked(panic_msg)
        }
    }
}

/// Ask the registered provider for the retrieval hint of `message_id`.
///
/// An unset or panicking provider yields an empty hint.
pub fn provide_hint(callbacks: &EventCallbacks, message_id: &MessageId) -> Vec<u8> {
    let Some(provider) = &callbacks.retrieval_hint_provider else {
        return Vec::new();
    };

    match catch_unwind(AssertUnwindSafe(|| provider(message_id))) {
        Ok(hint) => hint,
        Err(panic_info) => {
            error!(
                message_id = %message_id,
                panic = %extract_panic_message(&panic_info),
                "retrieval hint provider panicked"
            );
            Vec::new()
        }
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
