// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A user-space condition variable.
//!
//! Waiters are queued FIFO and identified by a monotonically increasing
//! *ticket*; `signal` pops the front of the queue and bumps the monotonic
//! `released` counter. A waiter is released exactly when
//! `released >= ticket`, which makes the handoff robust against wake-ups
//! racing with the waiter still being `Running`: the waiter re-checks the
//! counter under its own task lock immediately before suspending, and a
//! signal's `resume` serializes on that same lock.
//!
//! If a waiter unwinds out of its wait (typically because an event handler
//! raised [`Killed`](crate::Killed)), it either cedes its queue slot (when
//! not yet signalled) or forwards the signal to the next waiter, so no
//! signal is ever swallowed.

use crate::context;
use crate::scheduler;
use crate::sync::spinlock::{Spinlock, SpinlockGuard};
use crate::task::Task;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A condition variable that suspends fibers instead of OS threads.
///
/// Usable only from within tasks. Waiters keep processing their events while
/// they wait. No task must be waiting when the condition is dropped.
#[derive(Default)]
pub struct Condition {
    /// Number of waiters released so far. Monotonic.
    released: AtomicU64,
    queue: Spinlock<WaitQueue>,
}

struct WaitQueue {
    next_ticket: u64,
    /// FIFO of waiting tasks. A `None` slot is a waiter that unwound out of
    /// its wait and no longer wants the signal.
    waiters: VecDeque<Option<Arc<Task>>>,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self {
            next_ticket: 1,
            waiters: VecDeque::new(),
        }
    }
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `guard`'s lock, waits until signalled (processing events in
    /// the meantime), then re-acquires the lock and returns the new guard.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task. An unwind raised by an event
    /// handler while waiting is propagated after the wait is cancelled; the
    /// caller's lock is *not* re-acquired in that case.
    pub fn wait<'a, T>(&self, guard: SpinlockGuard<'a, T>) -> SpinlockGuard<'a, T> {
        let lock = SpinlockGuard::mutex(&guard);
        let task = scheduler::current_task_expect();

        let ticket = {
            let mut queue = self.queue.lock();
            queue.waiters.push_back(Some(Arc::clone(&task)));
            let ticket = queue.next_ticket;
            queue.next_ticket += 1;
            ticket
        };

        drop(guard);

        let waited = catch_unwind(AssertUnwindSafe(|| self.park(&task, ticket)));
        if let Err(payload) = waited {
            self.cancel_wait(ticket);
            resume_unwind(payload);
        }

        lock.lock()
    }

    /// Wakes up one waiting task, if any.
    ///
    /// The caller passes its held lock, which is released around the wake-up.
    pub fn signal<T>(&self, guard: &mut SpinlockGuard<'_, T>) {
        SpinlockGuard::unlocked(guard, || self.signal_one());
    }

    /// Wakes up every task currently waiting.
    pub fn signal_all<T>(&self, guard: &mut SpinlockGuard<'_, T>) {
        SpinlockGuard::unlocked(guard, || while self.signal_one() {});
    }

    /// Spin of the waiting task: process events, then suspend, until
    /// released. The final counter check happens under the task lock, which
    /// a signalling `resume` must also take, so a release cannot slip
    /// between check and suspend.
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
                // An event arrived since we drained; dispatch it before
                // parking or its wake-up is already spent.
                continue;
            }
            scheduler::suspend_current(task, core);
        }
    }

    /// Removes an unwound waiter without swallowing a signal: cede the queue
    /// slot when not yet released, forward the signal otherwise.
    fn cancel_wait(&self, ticket: u64) {
        let mut queue = self.queue.lock();
        let released = self.released.load(Ordering::Relaxed);
        if released < ticket {
            // Still queued; our index is recoverable from the counters.
            let index = (ticket - released - 1) as usize;
            if let Some(slot) = queue.waiters.get_mut(index) {
                *slot = None;
            }
        } else {
            // Already signalled; pass it on.
            drop(queue);
            self.signal_one();
        }
    }

    /// Pops waiters until one still wants its signal and resumes it. Returns
    /// whether a waiter was released.
    fn signal_one(&self) -> bool {
        loop {
            let waiter = {
                let mut queue = self.queue.lock();
                let Some(entry) = queue.waiters.pop_front() else {
                    return false;
                };
                self.released.fetch_add(1, Ordering::Release);
                entry
            };

            // A slot is None if the waiter cancelled; skip it.
            if let Some(task) = waiter {
                let core = task.core.lock();
                scheduler::resume(&task, core);
                return true;
            }
        }
    }
}
