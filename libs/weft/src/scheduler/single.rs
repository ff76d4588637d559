// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The single-task scheduler.
//!
//! Hosts exactly one task on one OS thread. Used to adopt an existing thread
//! into the system (`fiberize`) and to execute tasks built with
//! `os_thread()`. There is no coroutine: the task runs on the thread's own
//! stack, and "suspending" parks the thread inside the I/O context's
//! `run_loop` until some `resume` calls `stop_loop`.
//!
//! Resume transfers the held task lock to the parked thread: the resumer
//! forgets its guard after setting `scheduled`, and the woken thread releases
//! the raw lock once it has flipped the task back to `Running`.

use super::Schedule;
use crate::io::IoContext;
use crate::sync::spinlock::SpinlockGuard;
use crate::system::SystemShared;
use crate::task::{Status, Task, TaskCore};
use std::mem;
use std::sync::Arc;

pub(crate) struct SingleTaskScheduler {
    system: Arc<SystemShared>,
    io: Box<dyn IoContext>,
}

impl SingleTaskScheduler {
    pub(crate) fn new(system: Arc<SystemShared>) -> Self {
        Self {
            io: system.new_io_context(),
            system,
        }
    }

    pub(crate) fn io(&self) -> &dyn IoContext {
        self.io.as_ref()
    }
}

impl Schedule for SingleTaskScheduler {
    fn is_multi_tasking(&self) -> bool {
        false
    }

    fn system(&self) -> &Arc<SystemShared> {
        &self.system
    }

    fn resume(&self, _task: &Arc<Task>, mut core: SpinlockGuard<'_, TaskCore>) {
        // A `Starting` task is started by its own hosting thread; only
        // genuine suspends need (or can take) a wake-up.
        if core.status != Status::Suspended {
            return;
        }
        debug_assert!(!core.scheduled);
        core.scheduled = true;

        // Transfer the lock to the parked thread: it is released by the
        // `suspend` call below after the thread wakes up.
        mem::forget(core);
        self.io.stop_loop();
    }

    fn suspend(&self, task: &Arc<Task>, mut core: SpinlockGuard<'_, TaskCore>) {
        debug_assert_eq!(core.status, Status::Running);
        debug_assert!(!core.scheduled);
        core.status = Status::Suspended;
        drop(core);

        // Park until `resume` stops the loop.
        self.io.run_loop();

        // Safety: `run_loop` only returns after a `stop_loop`, i.e. after
        // `resume` set `scheduled` and handed us its held lock.
        unsafe {
            let core = &mut *task.core.data_ptr();
            debug_assert_eq!(core.status, Status::Suspended);
            debug_assert!(core.scheduled);
            core.status = Status::Running;
            core.scheduled = false;
            task.core.force_unlock();
        }
    }

    fn yield_now(&self, _task: &Arc<Task>) {
        self.io.run_loop_no_wait();
        std::thread::yield_now();
    }
}
