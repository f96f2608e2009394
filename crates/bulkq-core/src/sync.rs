//! Mutex helper shared by the cache, queues and monitor.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `m`, recovering the guard if a previous holder panicked.
///
/// Every structure guarded this way is left consistent between statements,
/// so a poisoned lock carries no torn state worth refusing.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
