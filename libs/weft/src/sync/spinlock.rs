// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task-style spinlock.
//!
//! Every task's record is guarded by one of these; they are held only for a
//! handful of instructions (status flips, mailbox pushes) so spinning with
//! exponential backoff beats parking. The same lock type backs
//! [`Promise`](crate::Promise), [`Mutex`](crate::Mutex) and
//! [`Condition`](crate::Condition).
//!
//! The scheduler relies on being able to hand a held lock across a context
//! switch: the suspending side `mem::forget`s its guard and the side that
//! completes the switch releases the raw lock. [`RawSpinlock`] is therefore
//! exposed through `lock_api`, whose `Mutex` provides the raw escape hatches
//! (`force_unlock`, `data_ptr`).

use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

/// A spinlock guarding a value of type `T`.
pub type Spinlock<T> = lock_api::Mutex<RawSpinlock, T>;

/// RAII guard for a [`Spinlock`].
pub type SpinlockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinlock, T>;

/// An [exponential backoff] for spin loops.
///
/// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Backoff {
    exp: u8,
}

impl Backoff {
    const MAX_EXPONENT: u8 = 8;

    pub(crate) const fn new() -> Self {
        Self { exp: 0 }
    }

    /// Backs off in a spin loop, issuing `2^exp` spin-loop hints and bumping
    /// the exponent up to a maximum.
    #[inline]
    pub(crate) fn spin(&mut self) {
        for _ in 0..1_u32 << self.exp {
            hint::spin_loop();
        }

        if self.exp < Self::MAX_EXPONENT {
            self.exp += 1;
        }
    }
}

/// The raw lock behind [`Spinlock`].
pub struct RawSpinlock {
    locked: AtomicBool,
}

// Safety: this is a correct mutual exclusion protocol; `try_lock` succeeds
// for exactly one thread until `unlock` is called.
unsafe impl lock_api::RawMutex for RawSpinlock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: RawSpinlock = RawSpinlock {
        locked: AtomicBool::new(false),
    };

    // Guards may be released by a different thread than the one that acquired
    // them; the scheduler does exactly that when completing a switch.
    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        let mut backoff = Backoff::new();
        loop {
            if self.try_lock() {
                return;
            }
            while self.locked.load(Ordering::Relaxed) {
                backoff.spin();
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mutual_exclusion() {
        let lock = Arc::new(Spinlock::new(0_u64));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn transferred_unlock() {
        // The protocol the scheduler uses: forget the guard, release the raw
        // lock later from elsewhere.
        let lock = Spinlock::new(1_u32);
        let guard = lock.lock();
        core::mem::forget(guard);
        assert!(lock.try_lock().is_none());
        // Safety: the lock is held and its guard was forgotten above.
        unsafe { lock.force_unlock() };
        assert!(lock.try_lock().is_some());
    }
}
