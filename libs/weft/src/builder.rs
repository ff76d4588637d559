// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Builders configuring and launching tasks.
//!
//! Obtained from [`FiberSystem::fiber`](crate::FiberSystem::fiber) and
//! [`FiberSystem::future`](crate::FiberSystem::future). A builder carries a
//! task body plus configuration (name, pin, execution mode) and is consumed
//! by [`run`](FiberBuilder::run), so it cannot be reused afterwards.

use crate::error::TaskError;
use crate::fiber_ref::{FiberRef, FutureRef};
use crate::path::{Ident, Path};
use crate::scheduler::{self, Schedule};
use crate::sync::promise::Promise;
use crate::system::{self, SystemShared};
use crate::task::{Status, Task};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// How a task is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunAs {
    /// Cooperatively scheduled on the multi-task worker pool. The default.
    Microthread,
    /// On a dedicated OS thread with a single-task scheduler.
    OsThread,
}

struct Config {
    shared: Arc<SystemShared>,
    name: Option<String>,
    pin: Option<Arc<dyn Schedule>>,
    run_as: RunAs,
}

impl Config {
    fn new(shared: Arc<SystemShared>) -> Self {
        Self {
            shared,
            name: None,
            pin: None,
            run_as: RunAs::Microthread,
        }
    }

    fn ident(&mut self) -> Ident {
        match self.name.take() {
            Some(name) => Ident::Named(name),
            None => crate::path::unique_ident(),
        }
    }

    fn path(&mut self) -> Path {
        Path::Prefixed {
            prefix: self.shared.uuid(),
            ident: self.ident(),
        }
    }

    fn launch(mut self, runnable: Box<dyn FnOnce() + Send + 'static>) -> Arc<Task> {
        let path = self.path();
        tracing::trace!(task = %path, run_as = ?self.run_as, "spawning task");

        let task = Task::new(
            path,
            Arc::clone(&self.shared),
            Status::Starting,
            self.pin.take(),
            Some(runnable),
        );

        match self.run_as {
            RunAs::Microthread => {
                let core = task.core.lock();
                scheduler::resume(&task, core);
            }
            RunAs::OsThread => system::run_as_os_thread(Arc::clone(&task)),
        }

        task
    }
}

macro_rules! builder_setters {
    () => {
        /// Names the task. The name becomes part of the task's path.
        pub fn named(mut self, name: impl Into<String>) -> Self {
            self.config.name = Some(name.into());
            self
        }

        /// Makes the task unnamed (a unique identifier is generated). This
        /// is the default.
        pub fn unnamed(mut self) -> Self {
            self.config.name = None;
            self
        }

        /// Pins the task to the scheduler running the current task. Pinned
        /// tasks are never stolen or routed elsewhere.
        ///
        /// No-op when the calling thread has no multi-tasking scheduler
        /// (single-task schedulers host exactly one task).
        pub fn pinned(mut self) -> Self {
            self.config.pin = scheduler::current_scheduler().filter(|s| s.is_multi_tasking());
            self
        }

        /// Unpins the task. This is the default.
        pub fn detached(mut self) -> Self {
            self.config.pin = None;
            self
        }

        /// Executes the task as a cooperatively scheduled microthread on the
        /// worker pool. This is the default.
        pub fn microthread(mut self) -> Self {
            self.config.run_as = RunAs::Microthread;
            self
        }

        /// Executes the task on a dedicated OS thread. Overrides pinning.
        pub fn os_thread(mut self) -> Self {
            self.config.run_as = RunAs::OsThread;
            self.config.pin = None;
            self
        }
    };
}

/// Builder for a fiber: a task that yields no result.
pub struct FiberBuilder<F> {
    config: Config,
    body: F,
}

impl<F> FiberBuilder<F>
where
    F: FnOnce() + Send + 'static,
{
    pub(crate) fn new(shared: Arc<SystemShared>, body: F) -> Self {
        Self {
            config: Config::new(shared),
            body,
        }
    }

    builder_setters!();

    /// Constructs the task and submits it for execution.
    ///
    /// Returns a dev-null reference if the system is shutting down.
    pub fn run(self) -> FiberRef {
        if self.config.shared.shutting_down() {
            return FiberRef::dev_null();
        }

        let body = self.body;
        let runnable = Box::new(move || {
            // A fiber's unwind (kill or user panic) is swallowed; the
            // trampoline's only job is to contain it.
            if catch_unwind(AssertUnwindSafe(body)).is_err() {
                tracing::trace!("fiber unwound");
            }
        });

        FiberRef::local(self.config.launch(runnable))
    }

    /// Like [`run`](Self::run), without constructing a reference.
    pub fn run_detached(self) {
        let _ = self.run();
    }
}

/// Builder for a future: a task whose result is observable through a
/// [`Promise`].
pub struct FutureBuilder<F> {
    config: Config,
    body: F,
}

impl<F, A> FutureBuilder<F>
where
    F: FnOnce() -> A + Send + 'static,
    A: Send + 'static,
{
    pub(crate) fn new(shared: Arc<SystemShared>, body: F) -> Self {
        Self {
            config: Config::new(shared),
            body,
        }
    }

    builder_setters!();

    /// Constructs the task and submits it for execution.
    ///
    /// Returns a dev-null reference (whose `join` fails with
    /// [`TaskError::NullAwaitable`]) if the system is shutting down.
    pub fn run(self) -> FutureRef<A> {
        if self.config.shared.shutting_down() {
            return FutureRef::dev_null();
        }

        let promise = Arc::new(Promise::new());
        let body = self.body;
        let runnable = Box::new({
            let promise = Arc::clone(&promise);
            move || {
                // The future's unwind is captured into the promise: `kill`
                // becomes Err(Killed), a user panic Err(Panicked).
                match catch_unwind(AssertUnwindSafe(body)) {
                    Ok(value) => promise.complete(value),
                    Err(payload) => promise.fail(TaskError::from_panic(payload)),
                };
            }
        });

        FutureRef::local(self.config.launch(runnable), promise)
    }

    /// Like [`run`](Self::run), without constructing a reference.
    pub fn run_detached(self) {
        let _ = self.run();
    }
}
