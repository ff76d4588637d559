// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The work-stealing multi-task scheduler.
//!
//! One instance per worker thread. Runnable tasks live in a per-worker deque:
//! the owning worker pops from the back (LIFO, better cache locality) while
//! thieves take from the front (FIFO, preserves rough spawn-order fairness).
//! Pinned tasks are never stolen.
//!
//! # Switching
//!
//! A worker runs a task by resuming its coroutine; the coroutine's parent
//! link ensures the task suspends back into [`Self::run_task`] on whatever
//! worker resumed it, so stolen tasks need no extra machinery. The two halves
//! of a switch are:
//!
//! - *task side* ([`Self::switch_from_running`]): flag the intent
//!   (`reschedule` for yield), forget the lock guard so the task lock stays
//!   held, and suspend. On wake-up, re-acquire the lock and flip back to
//!   `Running`.
//! - *worker side* (in [`Self::run_task`]): with the transferred lock still
//!   held, mark the task `Suspended`, re-enqueue it at the *front* if it
//!   yielded, stash the coroutine and only then release the lock.

use super::{Schedule, idle, set_current_scheduler, set_current_task};
use crate::io::IoContext;
use crate::stack_pool::StackPool;
use crate::sync::spinlock::SpinlockGuard;
use crate::system::SystemShared;
use crate::task::{Status, Task, TaskCore, TaskCoro};
use coro::{Coroutine, Exit};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

thread_local! {
    /// Per-worker stack cache. Stacks may be allocated on one worker and
    /// returned on another (stealing); the pools accept foreign stacks.
    static STACK_POOL: RefCell<StackPool> = RefCell::new(StackPool::new());
}

pub(crate) struct MultiTaskScheduler {
    index: usize,
    seed: u64,
    system: Arc<SystemShared>,
    io: Box<dyn IoContext>,
    /// Scheduled tasks waiting to be executed.
    run_queue: Mutex<VecDeque<Arc<Task>>>,
    emergency_stop: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MultiTaskScheduler {
    pub(crate) fn new(system: Arc<SystemShared>, index: usize, seed: u64) -> Self {
        Self {
            index,
            seed,
            io: system.new_io_context(),
            system,
            run_queue: Mutex::new(VecDeque::new()),
            emergency_stop: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker thread.
    pub(crate) fn start(this: &Arc<Self>) {
        let scheduler = Arc::clone(this);
        let handle = std::thread::Builder::new()
            .name(format!("weft-worker-{}", this.index))
            .spawn(move || scheduler.worker_main())
            .expect("failed to spawn worker thread");
        *this.worker.lock() = Some(handle);
    }

    /// Flags the worker to stop and joins it.
    pub(crate) fn stop(&self) {
        self.emergency_stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Takes one non-pinned task from the front of this worker's queue, for a
    /// thief.
    pub(crate) fn try_steal(&self) -> Option<Arc<Task>> {
        let mut queue = self.run_queue.lock();
        let pinned = queue.front()?.core.lock().pin.is_some();
        if pinned {
            return None;
        }
        queue.pop_front()
    }

    fn try_dequeue(&self) -> Option<Arc<Task>> {
        self.run_queue.lock().pop_back()
    }

    fn worker_main(self: Arc<Self>) {
        let _span = tracing::debug_span!("worker", index = self.index).entered();
        set_current_scheduler(Some(Arc::clone(&self) as Arc<dyn Schedule>));

        let mut rng = fastrand::Rng::with_seed(self.seed);
        let mut idle_streak: u64 = 0;

        while !self.emergency_stop.load(Ordering::Acquire) {
            if let Some(task) = self.try_dequeue() {
                self.run_task(task);
                idle_streak = 0;
                continue;
            }

            // Out of local work: try to take a task from a random peer.
            if let Some(task) = self.steal_from_peer(&mut rng) {
                tracing::trace!(task = %task.path, "stole task");
                self.run_task(task);
                idle_streak = 0;
                continue;
            }

            if self.io.poll() {
                idle_streak = 0;
                continue;
            }

            idle(&mut idle_streak);
        }

        set_current_scheduler(None);
    }

    fn steal_from_peer(&self, rng: &mut fastrand::Rng) -> Option<Arc<Task>> {
        let schedulers = self.system.schedulers();
        if schedulers.len() <= 1 {
            return None;
        }

        // Choose a random peer that is not ourselves.
        let mut victim = rng.usize(..schedulers.len() - 1);
        if victim >= self.index {
            victim += 1;
        }
        schedulers.get(victim)?.try_steal()
    }

    /// Runs `task` until it suspends, yields or terminates.
    fn run_task(&self, task: Arc<Task>) {
        set_current_task(Some(Arc::clone(&task)));

        let mut coro = self.take_or_create_coro(&task);

        match coro.resume(()) {
            Exit::Yielded(()) => {
                // The task switched out and left its lock held for us;
                // complete its half of the switch.
                let rescheduled =
                    // Safety: the task transferred its held lock to us, so we
                    // have exclusive access to the core and the coroutine
                    // slot until we force_unlock below.
                    unsafe {
                        let core = &mut *task.core.data_ptr();
                        debug_assert_eq!(core.status, Status::Running);
                        core.status = Status::Suspended;

                        let rescheduled = core.reschedule;
                        if rescheduled {
                            core.reschedule = false;
                            core.scheduled = true;
                        } else {
                            core.scheduled = false;
                        }

                        // Stash the coroutine before releasing the lock; the
                        // moment we unlock, another worker may resume the task.
                        *task.coro_slot() = Some(coro);
                        task.core.force_unlock();
                        rescheduled
                    };

                if rescheduled {
                    // Yielded tasks go to the *front* so yielding stays fair.
                    self.run_queue.lock().push_front(Arc::clone(&task));
                }
            }
            Exit::Returned(()) => self.terminate(&task, coro),
        }

        self.io.throttled_poll();
        set_current_task(None);
    }

    fn take_or_create_coro(&self, task: &Arc<Task>) -> TaskCoro {
        let (status, runnable) = {
            let mut core = task.core.lock();
            debug_assert!(matches!(core.status, Status::Starting | Status::Suspended));
            debug_assert!(core.scheduled);
            (core.status, core.runnable.take())
        };

        match status {
            Status::Starting => {
                let stack = STACK_POOL.with(|pool| pool.borrow_mut().allocate());
                let runnable = runnable.expect("starting task has no body");
                let task = Arc::clone(task);

                Coroutine::with_stack(stack, move |(), yielder| {
                    task.set_yielder(yielder);
                    {
                        let mut core = task.core.lock();
                        debug_assert_eq!(core.status, Status::Starting);
                        debug_assert!(core.scheduled);
                        core.status = Status::Running;
                        core.scheduled = false;
                    }

                    // The body terminates itself by returning; panics were
                    // already caught inside `runnable`.
                    runnable();

                    task.clear_yielder();
                })
            }
            // Safety: we own the task (popped it from a run queue), so the
            // coroutine slot is ours to take.
            Status::Suspended => unsafe {
                task.coro_slot().take().expect("suspended task has no coroutine")
            },
            Status::Running | Status::Dead => unreachable!("queued task in state {status:?}"),
        }
    }

    /// Tears down a task whose body returned.
    fn terminate(&self, task: &Arc<Task>, coro: TaskCoro) {
        tracing::trace!(task = %task.path, "task terminated");

        let stack = coro.into_stack();

        let drained = {
            let mut core = task.core.lock();
            debug_assert_eq!(core.status, Status::Running);
            core.status = Status::Dead;
            core.scheduled = false;
            // Unpin so the task does not keep its scheduler alive.
            core.pin = None;
            core.mailbox.take_all()
        };
        // Payload drops run outside the task lock.
        drop(drained);

        // Safety: the body has returned, no user code of this task can run
        // anymore, so the registry is exclusively ours.
        unsafe { task.handlers_mut().clear() };

        // The final switch off the terminating stack has completed (we are
        // back on the worker stack), but the pool still defers reuse by one
        // retire round.
        STACK_POOL.with(|pool| pool.borrow_mut().delayed_deallocate(stack));
    }

    /// Task-side switch: keeps the task lock held across the suspend.
    fn switch_from_running(task: &Arc<Task>, core: SpinlockGuard<'_, TaskCore>) {
        debug_assert_eq!(core.status, Status::Running);

        let yielder = task
            .yielder()
            .expect("suspend outside of a running coroutine");

        // The lock travels with the switch; run_task releases it.
        mem::forget(core);

        // Safety: the yielder is valid for the life of the coroutine and we
        // are running on that coroutine right now.
        unsafe { yielder.as_ref().suspend(()) };

        // Resumed again, possibly on a different worker.
        let mut core = task.core.lock();
        debug_assert_eq!(core.status, Status::Suspended);
        debug_assert!(core.scheduled);
        core.status = Status::Running;
        core.scheduled = false;
    }
}

impl Schedule for MultiTaskScheduler {
    fn is_multi_tasking(&self) -> bool {
        true
    }

    fn system(&self) -> &Arc<SystemShared> {
        &self.system
    }

    fn resume(&self, task: &Arc<Task>, mut core: SpinlockGuard<'_, TaskCore>) {
        debug_assert!(matches!(core.status, Status::Starting | Status::Suspended));
        debug_assert!(!core.scheduled);
        core.scheduled = true;
        drop(core);

        self.run_queue.lock().push_back(Arc::clone(task));
    }

    fn suspend(&self, task: &Arc<Task>, mut core: SpinlockGuard<'_, TaskCore>) {
        core.reschedule = false;
        Self::switch_from_running(task, core);
    }

    fn yield_now(&self, task: &Arc<Task>) {
        let mut core = task.core.lock();
        core.reschedule = true;
        Self::switch_from_running(task, core);
    }
}

