// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Free functions available inside any running task.
//!
//! These operate on the calling thread's current task: the fiber or future a
//! worker is executing, a thread adopted via
//! [`FiberSystem::fiberize`](crate::FiberSystem::fiberize), or an `os_thread`
//! task.

use crate::error::Killed;
use crate::event::{PendingEvent, kill_event};
use crate::fiber_ref::FiberRef;
use crate::handler::{HandlerFn, HandlerRef};
use crate::path::Path;
use crate::scheduler::{self, current_task_expect};
use crate::system::SystemHandle;
use crate::task::Task;
use std::rc::Rc;
use std::sync::Arc;

/// Returns a reference to the currently running task.
///
/// # Panics
///
/// Panics if called from outside a task.
pub fn current() -> FiberRef {
    FiberRef::local(current_task_expect())
}

/// Returns a handle to the system the current task belongs to, e.g. for
/// spawning further tasks.
///
/// # Panics
///
/// Panics if called from a thread with neither a task nor a scheduler.
pub fn system() -> SystemHandle {
    if let Some(task) = scheduler::current_task() {
        return SystemHandle::new(Arc::clone(&task.system));
    }
    let sched = scheduler::current_scheduler().expect("not called from within a weft task");
    SystemHandle::new(Arc::clone(sched.system()))
}

/// Suspends and reschedules the current task, allowing other tasks to run.
///
/// # Panics
///
/// Panics if called from outside a task.
pub fn yield_now() {
    let task = current_task_expect();
    let scheduler = scheduler::current_scheduler().expect("no scheduler on this thread");
    scheduler.yield_now(&task);
}

/// Requests cooperative termination of the current task's event loop.
///
/// Observed by tasks that process events after their body finished
/// (`os_thread` tasks and adopted threads).
///
/// # Panics
///
/// Panics if called from outside a task.
pub fn stop() {
    let task = current_task_expect();
    task.core.lock().stopped = true;
}

/// Processes all pending events, then returns. Does not suspend.
///
/// # Panics
///
/// Panics if called from outside a task. An unwind raised by a handler (e.g.
/// [`Killed`](crate::Killed)) propagates to the caller; the in-flight payload
/// is still released.
pub fn process() {
    let task = current_task_expect();

    let mut core = task.core.lock();
    while let Some(event) = core.mailbox.dequeue() {
        ensure_standard_handlers(&task);
        drop(core);
        // `event` is owned here, so its payload is released even if a
        // handler unwinds.
        dispatch(&task, &event);
        drop(event);
        core = task.core.lock();
    }
}

/// Processes events in a loop, forever (or until a handler unwinds, e.g. on
/// `kill`).
pub fn process_forever() -> ! {
    process_until(|| false);
    unreachable!("process_until(|| false) returned")
}

/// Processes events until `condition` returns true, suspending the task
/// whenever the mailbox runs dry.
///
/// The condition is re-checked after every dispatched event; the drain
/// short-circuits as soon as it holds.
///
/// # Panics
///
/// Panics if called from outside a task.
pub fn process_until(condition: impl Fn() -> bool) {
    let task = current_task_expect();

    while !condition() {
        let mut core = task.core.lock();
        loop {
            let Some(event) = core.mailbox.dequeue() else {
                break;
            };
            ensure_standard_handlers(&task);
            drop(core);

            dispatch(&task, &event);
            drop(event);

            if condition() {
                return;
            }
            core = task.core.lock();
        }

        // Mailbox is empty and we still hold the lock, so no send can slip
        // past us: suspend, transferring the lock into the switch.
        scheduler::suspend_current(&task, core);
    }
}

/// Binds a type-erased handler to `path` in the current task.
///
/// # Panics
///
/// Panics if called from outside a task.
pub(crate) fn bind(path: Path, callback: Rc<HandlerFn>) -> HandlerRef {
    let task = current_task_expect();
    // Safety: we are the task's own execution context, and the reference does
    // not escape this call.
    let handlers = unsafe { task.handlers_mut() };
    handlers.bind(path, callback)
}

/// Installs the built-in handlers if this is the first drain of the mailbox.
/// Currently that is just the `kill` handler, which raises [`Killed`] by
/// unwinding.
pub(crate) fn ensure_standard_handlers(task: &Arc<Task>) {
    // Safety: called from the task's own execution context only.
    let handlers = unsafe { task.handlers_mut() };
    if handlers.standard_installed {
        return;
    }
    handlers.standard_installed = true;
    handlers.bind_permanent(
        kill_event().path().clone(),
        Rc::new(|_payload: &(dyn std::any::Any + Send)| {
            std::panic::resume_unwind(Box::new(Killed))
        }),
    );
}

/// Dispatches one event to the current task's handlers.
///
/// Destroyed handlers are compacted out first (removing the whole block if
/// none survive); live handlers run in reverse order of binding.
pub(crate) fn dispatch(task: &Arc<Task>, event: &PendingEvent) {
    let callbacks: Vec<Rc<HandlerFn>> = {
        // Safety: we are the task's own execution context; the mutable borrow
        // ends before any handler (which may bind/release handlers itself)
        // runs.
        let handlers = unsafe { task.handlers_mut() };

        let Some(block) = handlers.blocks.get_mut(event.path()) else {
            return;
        };

        block.retain(|slot| !slot.is_destroyed());
        if block.is_empty() {
            handlers.blocks.remove(event.path());
            return;
        }

        block.iter().filter_map(|slot| slot.callback()).collect()
    };

    // Most recently bound first.
    for callback in callbacks.iter().rev() {
        callback(event.payload());
    }
}
