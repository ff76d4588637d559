// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Schedulers and task routing.
//!
//! Two scheduler kinds implement [`Schedule`]: the work-stealing
//! [`MultiTaskScheduler`](multi::MultiTaskScheduler) (one per worker thread)
//! and the [`SingleTaskScheduler`](single::SingleTaskScheduler) hosting
//! exactly one task on an OS thread. Which scheduler a wake-up lands on is
//! decided by [`resume`]: a pinned task goes to its pin, otherwise the
//! calling scheduler if it multi-tasks, otherwise a random multi-task
//! scheduler of the task's system.

pub(crate) mod multi;
pub(crate) mod single;

use crate::sync::spinlock::SpinlockGuard;
use crate::system::SystemShared;
use crate::task::{Status, Task, TaskCore};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// A scheduler, as seen by the rest of the runtime.
///
/// `resume` is callable from any thread; `suspend` and `yield_now` only from
/// the task currently running on this scheduler.
pub(crate) trait Schedule: Send + Sync {
    /// Whether this scheduler time-slices many tasks (and participates in
    /// work stealing).
    fn is_multi_tasking(&self) -> bool;

    fn system(&self) -> &Arc<SystemShared>;

    /// Makes a `Starting`/`Suspended` task runnable. The caller passes the
    /// held task lock; the scheduler consumes it.
    fn resume(&self, task: &Arc<Task>, core: SpinlockGuard<'_, TaskCore>);

    /// Suspends the running task. The caller passes the held task lock,
    /// which stays logically held across the switch and is released by
    /// whoever completes it. Returns once the task has been resumed.
    fn suspend(&self, task: &Arc<Task>, core: SpinlockGuard<'_, TaskCore>);

    /// Briefly gives up the CPU but keeps the task runnable.
    fn yield_now(&self, task: &Arc<Task>);
}

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Arc<dyn Schedule>>> = const { RefCell::new(None) };
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

pub(crate) fn set_current_scheduler(scheduler: Option<Arc<dyn Schedule>>) {
    CURRENT_SCHEDULER.with(|current| *current.borrow_mut() = scheduler);
}

pub(crate) fn current_scheduler() -> Option<Arc<dyn Schedule>> {
    CURRENT_SCHEDULER.with(|current| current.borrow().clone())
}

pub(crate) fn set_current_task(task: Option<Arc<Task>>) {
    CURRENT_TASK.with(|current| *current.borrow_mut() = task);
}

pub(crate) fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|current| current.borrow().clone())
}

/// Returns the currently running task.
///
/// # Panics
///
/// Panics when called from a thread that neither hosts a worker-run task nor
/// has been adopted via `fiberize`.
pub(crate) fn current_task_expect() -> Arc<Task> {
    current_task().expect("not called from within a weft task")
}

/// Makes `task` runnable if it can be (no-op on `Dead`/`Running` tasks and on
/// tasks that are already scheduled), routing it to the right scheduler.
///
/// The caller holds the task lock and has already serialized whatever made
/// the task runnable (e.g. a mailbox push) with this decision.
pub(crate) fn resume(task: &Arc<Task>, core: SpinlockGuard<'_, TaskCore>) {
    if !matches!(core.status, Status::Starting | Status::Suspended) || core.scheduled {
        return;
    }

    let scheduler: Arc<dyn Schedule> = if let Some(pin) = core.pin.clone() {
        pin
    } else if let Some(current) = current_scheduler().filter(|s| s.is_multi_tasking()) {
        current
    } else if let Some(random) = task.system.random_scheduler() {
        random
    } else {
        // The worker pool is gone (system teardown); nothing left to run on.
        return;
    };

    scheduler.resume(task, core);
}

/// Suspends the current task through whichever scheduler is running it.
pub(crate) fn suspend_current(task: &Arc<Task>, core: SpinlockGuard<'_, TaskCore>) {
    let scheduler = current_scheduler().expect("no scheduler on this thread");
    scheduler.suspend(task, core);
}

/// Tiered idle backoff: spin for short idle streaks, then yield the OS
/// thread, then sleep.
pub(crate) fn idle(idle_streak: &mut u64) {
    if *idle_streak <= 16 {
        // Nothing.
    } else if *idle_streak <= 64 {
        std::thread::yield_now();
    } else if *idle_streak <= 1024 * 1024 {
        std::thread::sleep(Duration::from_nanos(1));
    } else {
        std::thread::sleep(Duration::from_millis(1));
    }

    *idle_streak += 1;
}
