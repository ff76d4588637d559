// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::scheduler;
use crate::task::Task;
use std::marker::PhantomData;
use std::sync::Arc;

/// Pins the current task to its scheduler for the guard's lexical scope.
///
/// While pinned, the task is never stolen by other workers, so code that
/// relies on staying on one OS thread (e.g. thread-local state of an I/O
/// backend) stays put. A task that was already pinned is left untouched.
pub struct ScopedPin {
    task: Arc<Task>,
    was_pinned: bool,
    /// Pinning is a property of the current task; the guard must not leave
    /// its thread.
    _not_send: PhantomData<*mut ()>,
}

impl ScopedPin {
    /// Pins the current task to the scheduler it is running on.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task.
    pub fn new() -> Self {
        let task = scheduler::current_task_expect();
        let sched = scheduler::current_scheduler().expect("no scheduler on this thread");

        let was_pinned = {
            let mut core = task.core.lock();
            if core.pin.is_some() {
                true
            } else {
                core.pin = Some(sched);
                false
            }
        };

        Self {
            task,
            was_pinned,
            _not_send: PhantomData,
        }
    }
}

impl Default for ScopedPin {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedPin {
    fn drop(&mut self) {
        if !self.was_pinned {
            self.task.core.lock().pin = None;
        }
    }
}
