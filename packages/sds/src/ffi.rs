//! C entry point a native core calls back into.
//!
//! The native library takes one callback pointer plus opaque user data per
//! context. This crate hands it [`sds_event_callback`] with the context
//! handle as user data; the callback routes through the global registry.

use std::ffi::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::dispatch::extract_panic_message;
use crate::native::{ContextHandle, EventListener};
use crate::registry::ManagerRegistry;

/// Global native callback.
///
/// `caller_ret == 0` delivers `msg` as an event payload; any other value
/// reports a failed native-side callback invocation with `msg` as its
/// message.
///
/// # Safety
///
/// `msg` must be null or point to `len` readable bytes for the duration of
/// the call. `user_data` is only compared, never dereferenced.
#[no_mangle]
pub unsafe extern "C" fn sds_event_callback(
    caller_ret: c_int,
    msg: *const c_char,
    len: usize,
    user_data: *mut c_void,
) {
    let ctx = ContextHandle::from_raw(user_data as usize);
    let message = if msg.is_null() || len == 0 {
        String::new()
    } else {
        let bytes = std::slice::from_raw_parts(msg.cast::<u8>(), len);
        String::from_utf8_lossy(bytes).into_owned()
    };

    // Unwinding across the C boundary is undefined behaviour.
    let routed = catch_unwind(AssertUnwindSafe(|| {
        route(ManagerRegistry::global().as_ref(), ctx, caller_ret, &message)
    }));
    if let Err(panic_info) = routed {
        error!(
            ctx = %ctx,
            panic = %extract_panic_message(&panic_info),
            "sds event callback panicked"
        );
    }
}

pub(crate) fn route(listener: &dyn EventListener, ctx: ContextHandle, caller_ret: i32, message: &str) {
    if caller_ret == 0 {
        listener.on_event(ctx, message);
    } else {
        listener.on_callback_error(ctx, caller_ret, message);
    }
}
