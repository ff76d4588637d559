// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! One-shot completion slots.

use crate::error::{TaskError, TaskResult};
use crate::sync::condition::Condition;
use crate::sync::spinlock::Spinlock;

/// A one-shot container that is completed with a value (or failed with an
/// error) exactly once and can be awaited by any number of tasks.
///
/// Completion wakes all waiters; every wait after completion observes the
/// same result. Completing an already-completed promise is a no-op. This is
/// how futures report their result: the [`FutureRef::join`]
/// (crate::FutureRef::join) of a future awaits its promise.
pub struct Promise<A> {
    result: Spinlock<Option<TaskResult<A>>>,
    completed: Condition,
}

impl<A> Default for Promise<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Promise<A> {
    pub fn new() -> Self {
        Self {
            result: Spinlock::new(None),
            completed: Condition::new(),
        }
    }

    /// Completes the promise with `value`. Returns whether this call was the
    /// one that completed it.
    pub fn complete(&self, value: A) -> bool {
        self.finish(Ok(value))
    }

    /// Fails the promise with `error`. Returns whether this call was the one
    /// that completed it.
    pub fn fail(&self, error: TaskError) -> bool {
        self.finish(Err(error))
    }

    /// Returns a copy of the result if the promise is already complete.
    pub fn try_result(&self) -> Option<TaskResult<A>>
    where
        A: Clone,
    {
        self.result.lock().clone()
    }

    /// Suspends the current task until the promise is complete and returns a
    /// copy of the result.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task.
    pub fn wait(&self) -> TaskResult<A>
    where
        A: Clone,
    {
        let mut result = self.result.lock();
        while result.is_none() {
            result = self.completed.wait(result);
        }
        result.clone().unwrap_or_else(|| unreachable!())
    }

    fn finish(&self, value: TaskResult<A>) -> bool {
        let mut result = self.result.lock();
        if result.is_some() {
            return false;
        }
        *result = Some(value);
        self.completed.signal_all(&mut result);
        true
    }
}
