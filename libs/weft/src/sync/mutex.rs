// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A user-space mutex.
//!
//! Contended lockers queue up FIFO behind tickets, exactly like
//! [`Condition`](crate::Condition) waiters, and suspend their fiber rather
//! than the OS thread. `unlock` hands the mutex directly to the first live
//! waiter (the `locked` flag stays set), or clears `locked` when the queue
//! is empty.

use crate::context;
use crate::scheduler;
use crate::sync::spinlock::{Spinlock, SpinlockGuard};
use crate::task::Task;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A mutual exclusion lock that suspends fibers instead of OS threads.
///
/// Lock acquisition is FIFO modulo cancelled waiters. Usable only from
/// within tasks. No task must be waiting when the mutex is dropped.
#[derive(Default)]
pub struct Mutex {
    /// Number of waiters handed the lock so far. Monotonic.
    released: AtomicU64,
    state: Spinlock<State>,
}

struct State {
    locked: bool,
    next_ticket: u64,
    /// FIFO of waiting tasks. A `None` slot is a waiter that unwound and no
    /// longer wants the lock.
    waiters: VecDeque<Option<Arc<Task>>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            locked: false,
            next_ticket: 1,
            waiters: VecDeque::new(),
        }
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutex, suspending the current task on contention. Events
    /// are processed while waiting.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task. An unwind raised by an event
    /// handler while waiting leaves the mutex unaffected (the wait is
    /// cancelled, or the just-received lock is passed on) and propagates.
    pub fn lock(&self) {
        let mut state = self.state.lock();

        // No contention path.
        if !state.locked {
            state.locked = true;
            return;
        }

        let task = scheduler::current_task_expect();
        state.waiters.push_back(Some(Arc::clone(&task)));
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        drop(state);

        let waited = catch_unwind(AssertUnwindSafe(|| self.park(&task, ticket)));
        if let Err(payload) = waited {
            self.cancel_wait(ticket);
            resume_unwind(payload);
        }

        // Released: the unlocker left `locked` set for us, the mutex is ours.
    }

    /// Tries to acquire the mutex without blocking.
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.locked {
            false
        } else {
            state.locked = true;
            true
        }
    }

    /// Releases the mutex, waking the first live waiter if there is one.
    pub fn unlock(&self) {
        let state = self.state.lock();
        self.unlock_with(state);
    }

    fn park(&self, task: &Arc<Task>, ticket: u64) {
        loop {
            if self.released.load(Ordering::Acquire) >= ticket {
                return;
            }

            context::process();

            let core = task.core.lock();
            if self.released.load(Ordering::Acquire) >= ticket {
                return;
            }
            if !core.mailbox.is_empty() {
                continue;
            }
            scheduler::suspend_current(task, core);
        }
    }

    fn cancel_wait(&self, ticket: u64) {
        let mut state = self.state.lock();
        let released = self.released.load(Ordering::Relaxed);
        if released < ticket {
            // Still queued; give up the slot.
            let index = (ticket - released - 1) as usize;
            if let Some(slot) = state.waiters.get_mut(index) {
                *slot = None;
            }
        } else {
            // The lock was already handed to us; pass it on.
            self.unlock_with(state);
        }
    }

    /// Unlock with the state lock already held: hand the mutex to the first
    /// live waiter, or clear `locked` if there is none.
    fn unlock_with(&self, mut state: SpinlockGuard<'_, State>) {
        while let Some(entry) = state.waiters.pop_front() {
            self.released.fetch_add(1, Ordering::Release);

            // A slot is None if the waiter changed its mind about the lock.
            if let Some(task) = entry {
                drop(state);
                let core = task.core.lock();
                scheduler::resume(&task, core);
                return;
            }
        }

        // No waiter took over; the mutex is free.
        state.locked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_reflects_ownership() {
        let mutex = Mutex::new();
        assert!(mutex.try_lock());
        assert!(!mutex.try_lock());
        mutex.unlock();
        assert!(mutex.try_lock());
        mutex.unlock();
    }

    #[test]
    fn uncontended_lock_needs_no_task() {
        // The fast path never parks, so it works from any thread.
        let mutex = Mutex::new();
        mutex.lock();
        assert!(!mutex.try_lock());
        mutex.unlock();
    }
}
