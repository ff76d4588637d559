// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The task record: the unit of scheduling.
//!
//! # Lifecycle
//!
//! A task starts in [`Status::Starting`] and is handed to a scheduler. When a
//! worker picks it up for the first time it allocates a coroutine stack,
//! flips the task to [`Status::Running`] and executes its body. A task that
//! blocks or yields becomes [`Status::Suspended`] until some `resume` puts it
//! back on a run queue. When the body returns the task becomes
//! [`Status::Dead`] and is never scheduled again.
//!
//! # The lock protocol
//!
//! The [`TaskCore`] spinlock serializes every status transition with mailbox
//! pushes, which is the whole correctness story of the runtime:
//!
//! - a sender enqueues *and* decides whether to resume under one lock
//!   acquisition, so a wake-up can never be lost between the two;
//! - a suspending task keeps the lock held *across* the context switch (the
//!   guard is forgotten on one side and the raw lock released on the other),
//!   so no sender can observe a half-switched task.

use crate::event::PendingEvent;
use crate::handler::Handlers;
use crate::mailbox::Mailbox;
use crate::path::Path;
use crate::scheduler::{self, Schedule};
use crate::sync::spinlock::Spinlock;
use crate::system::SystemShared;
use coro::stack::OsStack;
use coro::{Coroutine, Yielder};
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// The task was newly created and has no stack yet.
    Starting,
    /// The task is executing on some worker.
    Running,
    /// The task is suspended, awaiting some condition.
    Suspended,
    /// The task is finished.
    Dead,
}

/// The coroutine hosting a task's body. Tasks communicate with their worker
/// entirely through the task record, so no values travel through the switch.
pub(crate) type TaskCoro = Coroutine<(), (), (), OsStack>;

/// The lock-guarded portion of a task record.
pub(crate) struct TaskCore {
    pub(crate) status: Status,
    /// `true` iff the task sits in some run queue (or, for single-task
    /// schedulers, a wake-up is pending). A task is in at most one queue.
    pub(crate) scheduled: bool,
    /// Set by `yield`: when the task next switches out it is re-enqueued
    /// instead of staying suspended.
    pub(crate) reschedule: bool,
    /// Cooperative termination request, observed by single-task scheduler
    /// event loops.
    pub(crate) stopped: bool,
    /// Scheduler this task is locked to, if any. Pinned tasks are never
    /// stolen and always resumed on their pin.
    pub(crate) pin: Option<Arc<dyn Schedule>>,
    pub(crate) mailbox: Mailbox,
    /// The task body; consumed on first resume.
    pub(crate) runnable: Option<Box<dyn FnOnce() + Send + 'static>>,
}

/// A task. Shared as `Arc<Task>`: run queues, `FiberRef`s and the worker
/// currently executing the task each hold one reference.
pub(crate) struct Task {
    pub(crate) path: Path,
    pub(crate) system: Arc<SystemShared>,
    pub(crate) core: Spinlock<TaskCore>,
    /// Handler registry. Only ever touched from the task's own execution
    /// context (its coroutine, or its hosting thread for adopted tasks).
    handlers: UnsafeCell<Handlers>,
    /// The suspended coroutine while the task is not running. Only the
    /// scheduler that owns the task at that moment touches this; handoffs
    /// between workers are ordered by the `core` lock.
    coro: UnsafeCell<Option<TaskCoro>>,
    /// Pointer to the coroutine's yielder, valid from first entry until the
    /// body returns. Only dereferenced by the running task itself.
    yielder: Cell<Option<NonNull<Yielder<(), ()>>>>,
}

// Safety: `core` is lock-protected. `handlers`, `coro` and `yielder` are
// confined to whichever thread currently executes the task; execution moves
// between threads only through release/acquire transitions on the `core`
// spinlock (suspend hands the lock over the switch, resume re-acquires it),
// so accesses are never concurrent.
unsafe impl Send for Task {}
// Safety: see above.
unsafe impl Sync for Task {}

impl Task {
    pub(crate) fn new(
        path: Path,
        system: Arc<SystemShared>,
        status: Status,
        pin: Option<Arc<dyn Schedule>>,
        runnable: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            path,
            system,
            core: Spinlock::new(TaskCore {
                status,
                scheduled: false,
                reschedule: false,
                stopped: false,
                pin,
                mailbox: Mailbox::new(),
                runnable,
            }),
            handlers: UnsafeCell::new(Handlers::default()),
            coro: UnsafeCell::new(None),
            yielder: Cell::new(None),
        })
    }

    /// Enqueues an event and wakes the task if it is suspended. This is the
    /// delivery path used by [`FiberRef::send`](crate::FiberRef::send).
    pub(crate) fn send(self: &Arc<Self>, event: PendingEvent) {
        let mut core = self.core.lock();
        if core.status == Status::Dead {
            // Nobody will ever dispatch it; drop the payload outside the lock.
            drop(core);
            drop(event);
            return;
        }
        core.mailbox.enqueue(event);
        scheduler::resume(self, core);
    }

    /// Access the handler registry.
    ///
    /// # Safety
    ///
    /// Only the task's own execution context may call this, and the returned
    /// reference must not outlive that use (in particular it must be dropped
    /// before re-entering user code, which may bind handlers itself).
    #[expect(clippy::mut_from_ref, reason = "confined to the owning task")]
    pub(crate) unsafe fn handlers_mut(&self) -> &mut Handlers {
        // Safety: per the function contract.
        unsafe { &mut *self.handlers.get() }
    }

    /// Access the stashed coroutine.
    ///
    /// # Safety
    ///
    /// Only the scheduler currently owning the task may call this.
    #[expect(clippy::mut_from_ref, reason = "confined to the owning scheduler")]
    pub(crate) unsafe fn coro_slot(&self) -> &mut Option<TaskCoro> {
        // Safety: per the function contract.
        unsafe { &mut *self.coro.get() }
    }

    pub(crate) fn set_yielder(&self, yielder: &Yielder<(), ()>) {
        self.yielder.set(Some(NonNull::from(yielder)));
    }

    pub(crate) fn clear_yielder(&self) {
        self.yielder.set(None);
    }

    pub(crate) fn yielder(&self) -> Option<NonNull<Yielder<(), ()>>> {
        self.yielder.get()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("path", &self.path).finish()
    }
}
