//! Per-key writer serialization
//!
//! Writers for the same key always map to the same stripe. The critical
//! section is a handful of atomic operations, so the lock spins instead of
//! parking the thread.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub(super) struct StripeLock {
    locked: AtomicBool,
}

pub(super) struct StripeGuard<'a> {
    lock: &'a StripeLock,
}

impl StripeLock {
    pub(super) fn lock(&self) -> StripeGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        StripeGuard { lock: self }
    }
}

impl Drop for StripeGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
