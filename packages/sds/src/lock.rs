//! Lock helpers that recover from poisoning instead of panicking.
//!
//! A hook that panics while the bridge holds one of its locks must not take
//! the registry or a manager down with it.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = what, "mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read<'a, T>(rwlock: &'a RwLock<T>, what: &'static str) -> RwLockReadGuard<'a, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = what, "rwlock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write<'a, T>(rwlock: &'a RwLock<T>, what: &'static str) -> RwLockWriteGuard<'a, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = what, "rwlock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
