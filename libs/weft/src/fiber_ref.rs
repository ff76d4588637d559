// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! References to running tasks.

use crate::error::TaskResult;
use crate::event::{Event, PendingEvent, kill_event};
use crate::path::Path;
use crate::sync::promise::Promise;
use crate::task::Task;
use std::fmt;
use std::sync::Arc;

/// A shared reference to a fiber (or any task), used to send it events.
///
/// Holding a `FiberRef` keeps the task record alive but does not prolong its
/// execution. The *dev-null* variant points at no task: sends are dropped.
/// Dev-null refs come from [`run`](crate::FiberBuilder::run) during shutdown.
#[derive(Clone)]
pub struct FiberRef {
    inner: RefInner,
}

#[derive(Clone)]
enum RefInner {
    Local(Arc<Task>),
    DevNull,
}

impl FiberRef {
    pub(crate) fn local(task: Arc<Task>) -> Self {
        Self {
            inner: RefInner::Local(task),
        }
    }

    /// A reference pointing at no task.
    pub fn dev_null() -> Self {
        Self {
            inner: RefInner::DevNull,
        }
    }

    /// Returns the path of the referenced task.
    pub fn path(&self) -> Path {
        match &self.inner {
            RefInner::Local(task) => task.path.clone(),
            RefInner::DevNull => Path::DevNull,
        }
    }

    /// Sends `event` with `value` to the referenced task.
    ///
    /// Events sent from one thread are delivered in send order. Sends to
    /// dev-null refs, of dev-null events, or to dead tasks are dropped.
    pub fn send<A: Send + 'static>(&self, event: &Event<A>, value: A) {
        let RefInner::Local(task) = &self.inner else {
            return;
        };
        if event.path().is_dev_null() {
            return;
        }
        task.send(PendingEvent::new(event.path().clone(), Box::new(value)));
    }

    /// Sends the built-in `kill` event, which raises
    /// [`Killed`](crate::Killed) in the receiving task on its next dispatch.
    pub fn kill(&self) {
        self.send(&kill_event(), ());
    }
}

impl fmt::Debug for FiberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FiberRef").field(&self.path()).finish()
    }
}

/// A [`FiberRef`] to a future: additionally gives access to the task's
/// result.
pub struct FutureRef<A> {
    fiber: FiberRef,
    promise: Option<Arc<Promise<A>>>,
}

impl<A> FutureRef<A> {
    pub(crate) fn local(task: Arc<Task>, promise: Arc<Promise<A>>) -> Self {
        Self {
            fiber: FiberRef::local(task),
            promise: Some(promise),
        }
    }

    /// A reference pointing at no future. Joining it fails with
    /// [`TaskError::NullAwaitable`](crate::TaskError::NullAwaitable).
    pub fn dev_null() -> Self {
        Self {
            fiber: FiberRef::dev_null(),
            promise: None,
        }
    }

    /// Returns the path of the referenced task.
    pub fn path(&self) -> Path {
        self.fiber.path()
    }

    /// Sends `event` with `value` to the referenced task.
    pub fn send<E: Send + 'static>(&self, event: &Event<E>, value: E) {
        self.fiber.send(event, value);
    }

    /// Sends the built-in `kill` event. The killed future completes with
    /// `Err(TaskError::Killed)`.
    pub fn kill(&self) {
        self.fiber.kill();
    }

    /// Returns a plain fiber reference to the same task.
    pub fn as_fiber(&self) -> FiberRef {
        self.fiber.clone()
    }

    /// Returns the promise carrying this future's result.
    pub fn promise(&self) -> Option<&Arc<Promise<A>>> {
        self.promise.as_ref()
    }

    /// Suspends the current task until the future completes and returns its
    /// result.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task.
    pub fn join(&self) -> TaskResult<A>
    where
        A: Clone,
    {
        match &self.promise {
            Some(promise) => promise.wait(),
            None => Err(crate::error::TaskError::NullAwaitable),
        }
    }
}

impl<A> Clone for FutureRef<A> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber.clone(),
            promise: self.promise.clone(),
        }
    }
}

impl<A> fmt::Debug for FutureRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FutureRef").field(&self.path()).finish()
    }
}
