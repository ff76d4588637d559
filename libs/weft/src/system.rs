// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The fiber system: owner of the scheduler pool.

use crate::builder::{FiberBuilder, FutureBuilder};
use crate::context;
use crate::fiber_ref::FiberRef;
use crate::io::{IoContext, IoFactory, NullIo};
use crate::path::{Path, unique_ident};
use crate::scheduler::{self, Schedule, multi::MultiTaskScheduler, single::SingleTaskScheduler};
use crate::task::{Status, Task};
use parking_lot::{RwLock, RwLockReadGuard};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// State shared by every scheduler, task and handle of one system.
pub(crate) struct SystemShared {
    uuid: Uuid,
    shutting_down: AtomicBool,
    schedulers: RwLock<Vec<Arc<MultiTaskScheduler>>>,
    io_factory: IoFactory,
}

impl SystemShared {
    pub(crate) fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub(crate) fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn schedulers(&self) -> RwLockReadGuard<'_, Vec<Arc<MultiTaskScheduler>>> {
        self.schedulers.read()
    }

    pub(crate) fn new_io_context(&self) -> Box<dyn IoContext> {
        (self.io_factory)()
    }

    /// Picks a uniformly random multi-task scheduler, or `None` when the
    /// worker pool is already torn down.
    pub(crate) fn random_scheduler(&self) -> Option<Arc<dyn Schedule>> {
        let schedulers = self.schedulers.read();
        if schedulers.is_empty() {
            return None;
        }
        let index = fastrand::usize(..schedulers.len());
        Some(Arc::clone(&schedulers[index]) as Arc<dyn Schedule>)
    }
}

/// A multi-task runtime: a pool of worker threads running cooperatively
/// scheduled tasks that communicate through typed events.
///
/// Dropping the system stops and joins every worker. In-flight tasks are not
/// cancelled automatically; callers are expected to [`kill`](FiberRef::kill)
/// them and await completion first.
pub struct FiberSystem {
    shared: Arc<SystemShared>,
}

impl FiberSystem {
    /// Starts the system with one worker per available CPU.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_threads(threads)
    }

    /// Starts the system with the given number of workers.
    pub fn with_threads(threads: usize) -> Self {
        Self::with_io(threads, Arc::new(|| Box::new(NullIo::new()) as Box<dyn IoContext>))
    }

    /// Starts the system with the given number of workers and an I/O backend;
    /// `io_factory` is invoked once per scheduler.
    pub fn with_io(threads: usize, io_factory: IoFactory) -> Self {
        let shared = Arc::new(SystemShared {
            uuid: Uuid::new_v4(),
            shutting_down: AtomicBool::new(false),
            schedulers: RwLock::new(Vec::new()),
            io_factory,
        });

        let schedulers: Vec<_> = (0..threads.max(1))
            .map(|index| {
                Arc::new(MultiTaskScheduler::new(
                    Arc::clone(&shared),
                    index,
                    fastrand::u64(..),
                ))
            })
            .collect();
        *shared.schedulers.write() = schedulers.clone();

        for scheduler in &schedulers {
            MultiTaskScheduler::start(scheduler);
        }

        tracing::debug!(uuid = %shared.uuid, workers = threads, "fiber system started");
        Self { shared }
    }

    /// Creates a builder for a fiber executing `body`.
    pub fn fiber<F>(&self, body: F) -> FiberBuilder<F>
    where
        F: FnOnce() + Send + 'static,
    {
        FiberBuilder::new(Arc::clone(&self.shared), body)
    }

    /// Creates a builder for a future executing `body`.
    pub fn future<F, A>(&self, body: F) -> FutureBuilder<F>
    where
        F: FnOnce() -> A + Send + 'static,
        A: Send + 'static,
    {
        FutureBuilder::new(Arc::clone(&self.shared), body)
    }

    /// Makes subsequent `run` calls return dev-null references. Running
    /// tasks are unaffected.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
    }

    pub fn shutting_down(&self) -> bool {
        self.shared.shutting_down()
    }

    /// Returns the UUID prefixing the paths of this system's tasks.
    pub fn uuid(&self) -> Uuid {
        self.shared.uuid
    }

    /// Returns a cheap, non-owning handle to this system, e.g. for spawning
    /// tasks from within tasks.
    pub fn handle(&self) -> SystemHandle {
        SystemHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Adopts the calling thread into the system, enabling it to run task
    /// operations (send and await events, spawn tasks, wait promises).
    ///
    /// The adopted task is serviced by a single-task scheduler that parks the
    /// thread when it waits. Adoption lasts for the thread's lifetime;
    /// calling `fiberize` on an already adopted thread returns a reference to
    /// the existing task.
    pub fn fiberize(&self) -> FiberRef {
        if let Some(task) = scheduler::current_task() {
            return FiberRef::local(task);
        }

        let task = Task::new(
            Path::Prefixed {
                prefix: self.shared.uuid,
                ident: unique_ident(),
            },
            Arc::clone(&self.shared),
            Status::Running,
            None,
            None,
        );

        let single = Arc::new(SingleTaskScheduler::new(Arc::clone(&self.shared)));
        task.core.lock().pin = Some(Arc::clone(&single) as Arc<dyn Schedule>);

        scheduler::set_current_scheduler(Some(single as Arc<dyn Schedule>));
        scheduler::set_current_task(Some(Arc::clone(&task)));

        tracing::trace!(task = %task.path, "adopted thread");
        FiberRef::local(task)
    }
}

impl Default for FiberSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FiberSystem {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);

        // Take the pool down: emptying the list stops routing and breaks the
        // shared-state cycle, then each worker is flagged and joined.
        let schedulers = std::mem::take(&mut *self.shared.schedulers.write());
        for scheduler in &schedulers {
            scheduler.stop();
        }
    }
}

/// A cheap, clonable, non-owning handle to a [`FiberSystem`].
///
/// Unlike the system itself, dropping a handle has no effect on the worker
/// pool, so handles can be captured freely by task bodies (e.g. to spawn
/// sub-futures). Obtained from [`FiberSystem::handle`] or, inside a task,
/// from [`context::system`](crate::context::system).
#[derive(Clone)]
pub struct SystemHandle {
    shared: Arc<SystemShared>,
}

impl SystemHandle {
    pub(crate) fn new(shared: Arc<SystemShared>) -> Self {
        Self { shared }
    }

    /// Creates a builder for a fiber executing `body`.
    pub fn fiber<F>(&self, body: F) -> FiberBuilder<F>
    where
        F: FnOnce() + Send + 'static,
    {
        FiberBuilder::new(Arc::clone(&self.shared), body)
    }

    /// Creates a builder for a future executing `body`.
    pub fn future<F, A>(&self, body: F) -> FutureBuilder<F>
    where
        F: FnOnce() -> A + Send + 'static,
        A: Send + 'static,
    {
        FutureBuilder::new(Arc::clone(&self.shared), body)
    }

    /// Makes subsequent `run` calls return dev-null references.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
    }

    pub fn shutting_down(&self) -> bool {
        self.shared.shutting_down()
    }

    pub fn uuid(&self) -> Uuid {
        self.shared.uuid
    }
}

/// Runs `task` on a dedicated OS thread behind a fresh single-task
/// scheduler: execute the body, then keep processing events until the task
/// is stopped (or killed), then tear it down.
pub(crate) fn run_as_os_thread(task: Arc<Task>) {
    let single = Arc::new(SingleTaskScheduler::new(Arc::clone(&task.system)));

    // Pin before the thread exists: an early send must not route the task
    // to the worker pool, and the single-task scheduler ignores resumes of
    // tasks it has not started yet.
    {
        let mut core = task.core.lock();
        debug_assert_eq!(core.status, Status::Starting);
        core.pin = Some(Arc::clone(&single) as Arc<dyn Schedule>);
    }

    let spawned = std::thread::Builder::new()
        .name("weft-task".into())
        .spawn(move || {
            let runnable = {
                let mut core = task.core.lock();
                core.status = Status::Running;
                core.runnable.take()
            };

            scheduler::set_current_scheduler(Some(Arc::clone(&single) as Arc<dyn Schedule>));
            scheduler::set_current_task(Some(Arc::clone(&task)));

            // The body contains its own unwind protection.
            if let Some(runnable) = runnable {
                runnable();
            }

            // Process events until the task is stopped. A handler unwind
            // (typically `kill`) ends the loop as well.
            let _ = catch_unwind(AssertUnwindSafe(|| {
                let mut idle_streak: u64 = 0;
                loop {
                    if task.core.lock().stopped {
                        break;
                    }

                    scheduler::idle(&mut idle_streak);

                    if !task.core.lock().mailbox.is_empty() {
                        context::process();
                        idle_streak = 0;
                    }

                    if single.io().poll() {
                        idle_streak = 0;
                    }
                }
            }));

            // Unhook the thread from the system.
            let drained = {
                let mut core = task.core.lock();
                core.status = Status::Dead;
                core.scheduled = false;
                core.pin = None;
                core.mailbox.take_all()
            };
            drop(drained);
            // Safety: the body and the event loop have finished; no code of
            // this task runs anymore.
            unsafe { task.handlers_mut().clear() };

            scheduler::set_current_task(None);
            scheduler::set_current_scheduler(None);
        });

    // The thread runs detached, like any other task.
    if let Err(error) = spawned {
        tracing::warn!(%error, "failed to spawn os-thread task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::event::Event;
    use crate::sync::{Condition, Mutex, Promise, Spinlock};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tracing_subscriber::util::SubscriberInitExt;

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .set_default()
    }

    #[test]
    fn send_then_wait_round_trip() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let request: Event<u64> = Event::unique();

        let doubler = system
            .future({
                let request = request.clone();
                move || request.wait() * 2
            })
            .run();

        doubler.send(&request, 21);
        assert_eq!(doubler.join(), Ok(42));
    }

    #[test]
    fn named_tasks_and_paths() {
        let system = FiberSystem::with_threads(1);
        system.fiberize();

        let worker = system.future(|| ()).named("worker").run();
        assert_eq!(worker.path().to_string(), format!("{}:worker", system.uuid()));
        worker.join().unwrap();
    }

    #[test]
    fn echo_emitter() {
        let _trace = init_tracing();
        const INITIAL: u32 = 100;
        const TOTAL: u32 = 10_000;

        let system = FiberSystem::with_threads(4);
        system.fiberize();

        let ping: Event<FiberRef> = Event::unique();
        let pong: Event<()> = Event::unique();

        let echo = system
            .fiber({
                let ping = ping.clone();
                let pong = pong.clone();
                move || {
                    loop {
                        let sender = ping.wait();
                        sender.send(&pong, ());
                    }
                }
            })
            .run();

        let emitter = system
            .future({
                let echo = echo.clone();
                let ping = ping.clone();
                let pong = pong.clone();
                move || {
                    let me = context::current();
                    let mut sent = 0_u32;
                    let mut received = 0_u32;

                    while sent < INITIAL {
                        echo.send(&ping, me.clone());
                        sent += 1;
                    }
                    while received < TOTAL {
                        pong.wait();
                        received += 1;
                        if sent < TOTAL {
                            echo.send(&ping, me.clone());
                            sent += 1;
                        }
                    }
                    received
                }
            })
            .run();

        assert_eq!(emitter.join(), Ok(TOTAL));
        echo.kill();
    }

    fn fib_sequential(n: u64) -> u64 {
        if n <= 1 { 1 } else { fib_sequential(n - 2) + fib_sequential(n - 1) }
    }

    fn fib_parallel(n: u64) -> u64 {
        if n <= 1 {
            1
        } else {
            let system = context::system();
            let x = system.future(move || fib_parallel(n - 2)).run();
            let y = system.future(move || fib_parallel(n - 1)).run();
            x.join().unwrap() + y.join().unwrap()
        }
    }

    #[test]
    fn fibonacci_via_futures() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(4);
        system.fiberize();

        for n in 0..=15 {
            let result = system.future(move || fib_parallel(n)).run();
            assert_eq!(result.join(), Ok(fib_sequential(n)));
        }
    }

    #[test]
    fn ping_pong_handshake() {
        let _trace = init_tracing();
        const ROUNDS: u32 = 10_000;

        let system = FiberSystem::with_threads(4);
        system.fiberize();

        let hello: Event<FiberRef> = Event::unique();
        let ack: Event<()> = Event::unique();
        let ping: Event<()> = Event::unique();
        let pong: Event<()> = Event::unique();

        let bob = system
            .future({
                let (hello, ack, ping, pong) =
                    (hello.clone(), ack.clone(), ping.clone(), pong.clone());
                move || {
                    let peer = hello.wait();
                    peer.send(&ack, ());
                    for _ in 0..ROUNDS {
                        ping.wait();
                        peer.send(&pong, ());
                    }
                }
            })
            .run();

        let alice = system
            .future({
                let bob = bob.as_fiber();
                let (hello, ack, ping, pong) =
                    (hello.clone(), ack.clone(), ping.clone(), pong.clone());
                move || {
                    bob.send(&hello, context::current());
                    ack.wait();
                    for _ in 0..ROUNDS {
                        bob.send(&ping, ());
                        pong.wait();
                    }
                }
            })
            .run();

        assert_eq!(alice.join(), Ok(()));
        assert_eq!(bob.join(), Ok(()));
    }

    #[test]
    fn mass_kill() {
        let _trace = init_tracing();
        const SLEEPERS: usize = 2_000;

        let system = FiberSystem::with_threads(4);
        system.fiberize();

        let refs: Vec<_> = (0..SLEEPERS)
            .map(|_| {
                system
                    .future(|| {
                        context::process_forever();
                    })
                    .run()
            })
            .collect();

        for sleeper in &refs {
            sleeper.kill();
        }
        for sleeper in &refs {
            assert_eq!(sleeper.join(), Err(TaskError::Killed));
        }
    }

    #[test]
    fn kill_before_first_dispatch() {
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        // The built-in kill handler is installed lazily, before the first
        // event is dispatched; killing a task that has never processed
        // events must still work.
        let sleeper = system
            .future(|| {
                context::process_forever();
            })
            .run();
        sleeper.kill();
        assert_eq!(sleeper.join(), Err(TaskError::Killed));
    }

    #[test]
    fn user_panic_is_captured() {
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let angry = system.future(|| panic!("boom")).run();
        match angry.join() {
            Err(TaskError::Panicked(message)) => assert_eq!(&*message, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }

        // A panicking *fiber* is swallowed; the system stays healthy.
        system.fiber(|| panic!("boom")).run();
        let after = system.future(|| 1).run();
        assert_eq!(after.join(), Ok(1));
    }

    #[test]
    fn promise_completion_and_idempotence() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let promise = Arc::new(Promise::new());

        let observer = system
            .future({
                let promise = Arc::clone(&promise);
                move || promise.wait().unwrap()
            })
            .run();

        // Give the observer a chance to start waiting before completion.
        std::thread::sleep(Duration::from_millis(10));

        assert!(promise.complete(7));
        assert!(!promise.complete(9));
        assert!(!promise.fail(TaskError::Killed));

        assert_eq!(observer.join(), Ok(7));
        assert_eq!(promise.wait(), Ok(7));
    }

    #[test]
    fn sleepers_complete_when_backend_fires() {
        let _trace = init_tracing();
        const SLEEPERS: usize = 500;

        let system = FiberSystem::with_threads(4);
        system.fiberize();

        // Stands in for a timer backend: an external thread completes the
        // promise after a delay while the workers stay free for other tasks.
        let timer = Arc::new(Promise::new());
        let refs: Vec<_> = (0..SLEEPERS)
            .map(|_| {
                let timer = Arc::clone(&timer);
                system.future(move || timer.wait().unwrap()).run()
            })
            .collect();

        let completer = {
            let timer = Arc::clone(&timer);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                timer.complete(());
            })
        };

        // The pool is not stalled by the parked sleepers.
        let busy = system.future(|| 3).run();
        assert_eq!(busy.join(), Ok(3));

        for sleeper in refs {
            assert_eq!(sleeper.join(), Ok(()));
        }
        completer.join().unwrap();
    }

    #[test]
    fn shutdown_yields_dev_null_refs() {
        let system = FiberSystem::with_threads(1);
        system.fiberize();

        system.shutdown();
        assert!(system.shutting_down());

        let fiber = system.fiber(|| ()).run();
        assert_eq!(fiber.path(), Path::DevNull);
        fiber.send(&Event::named("nothing"), 1_u32);
        fiber.kill();

        let future = system.future(|| 1).run();
        assert_eq!(future.join(), Err(TaskError::NullAwaitable));
    }

    #[test]
    fn os_thread_task() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let request: Event<u32> = Event::unique();
        let answer = system
            .future({
                let request = request.clone();
                move || request.wait() + 1
            })
            .os_thread()
            .run();

        answer.send(&request, 41);
        assert_eq!(answer.join(), Ok(42));

        // The hosting thread keeps processing events until told to go away.
        answer.kill();
    }

    #[test]
    fn pinned_tasks_stay_on_their_worker() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(4);
        system.fiberize();

        // Noise to give the other workers a reason to steal.
        let noise: Vec<_> = (0..64)
            .map(|_| {
                system
                    .future(|| {
                        for _ in 0..100 {
                            context::yield_now();
                        }
                    })
                    .run()
            })
            .collect();

        let pinned = system
            .future(|| {
                // `pinned()` must run on the worker itself, so the pinned
                // task is spawned from inside another task.
                let inner = context::system()
                    .future(|| {
                        let home = std::thread::current().id();
                        for _ in 0..200 {
                            context::yield_now();
                            assert_eq!(std::thread::current().id(), home);
                        }
                    })
                    .pinned()
                    .run();
                inner.join().unwrap();
            })
            .run();

        assert_eq!(pinned.join(), Ok(()));
        for task in noise {
            task.join().unwrap();
        }
    }

    #[test]
    fn scoped_pin_keeps_thread() {
        let system = FiberSystem::with_threads(4);
        system.fiberize();

        let task = system
            .future(|| {
                let _pin = crate::ScopedPin::new();
                let home = std::thread::current().id();
                for _ in 0..200 {
                    context::yield_now();
                    assert_eq!(std::thread::current().id(), home);
                }
            })
            .run();

        task.join().unwrap();
    }

    #[test]
    fn handler_dispatch_order_and_rebinding() {
        let system = FiberSystem::with_threads(1);
        system.fiberize();

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let event: Event<()> = Event::unique();

        let recorded = system
            .future({
                let order = Arc::clone(&order);
                let event = event.clone();
                move || {
                    let me = context::current();

                    let push = |tag: u8| {
                        let order = Arc::clone(&order);
                        move |_: &()| order.lock().push(tag)
                    };

                    let _h1 = event.bind(push(1));
                    let h2 = event.bind(push(2));
                    let _h3 = event.bind(push(3));

                    // Most recently bound first.
                    me.send(&event, ());
                    context::process();

                    // Releasing a handler removes it from dispatch...
                    h2.release();
                    me.send(&event, ());
                    context::process();

                    // ...and re-binding makes it active again, as newest.
                    let _h2 = event.bind(push(2));
                    me.send(&event, ());
                    context::process();
                }
            })
            .run();

        recorded.join().unwrap();
        assert_eq!(*order.lock(), vec![3, 2, 1, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn single_sender_fifo_ordering() {
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let event: Event<u32> = Event::unique();

        let collector = system
            .future({
                let event = event.clone();
                move || {
                    let mut seen = Vec::new();
                    for _ in 0..100 {
                        seen.push(event.wait());
                    }
                    seen
                }
            })
            .run();

        for i in 0..100 {
            collector.send(&event, i);
        }

        assert_eq!(collector.join().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn mutex_handoff_in_arrival_order() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(1);
        system.fiberize();

        let mutex = Arc::new(Mutex::new());
        let arrivals = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let acquisitions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let arrived = Arc::new(AtomicUsize::new(0));

        mutex.lock();

        let contenders: Vec<_> = (0..3_u8)
            .map(|id| {
                let mutex = Arc::clone(&mutex);
                let arrivals = Arc::clone(&arrivals);
                let acquisitions = Arc::clone(&acquisitions);
                let arrived = Arc::clone(&arrived);
                system
                    .future(move || {
                        arrivals.lock().push(id);
                        arrived.fetch_add(1, Ordering::SeqCst);
                        mutex.lock();
                        acquisitions.lock().push(id);
                        mutex.unlock();
                    })
                    .run()
            })
            .collect();

        while arrived.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        mutex.unlock();

        for contender in contenders {
            contender.join().unwrap();
        }
        assert_eq!(*acquisitions.lock(), *arrivals.lock());
    }

    #[test]
    fn mutex_mutual_exclusion() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(4);
        system.fiberize();

        let mutex = Arc::new(Mutex::new());
        let counter = Arc::new(parking_lot::Mutex::new(0_u64));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let counter = Arc::clone(&counter);
                system
                    .future(move || {
                        for _ in 0..100 {
                            mutex.lock();
                            // Non-atomic read-modify-write under the fiber
                            // mutex; races would lose increments.
                            let value = *counter.lock();
                            context::yield_now();
                            *counter.lock() = value + 1;
                            mutex.unlock();
                        }
                    })
                    .run()
            })
            .collect();

        for task in tasks {
            task.join().unwrap();
        }
        assert_eq!(*counter.lock(), 800);
    }

    #[test]
    fn condition_signal_all_releases_current_waiters() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let lock = Arc::new(Spinlock::new(()));
        let condition = Arc::new(Condition::new());
        let waiting = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let condition = Arc::clone(&condition);
                let waiting = Arc::clone(&waiting);
                system
                    .future(move || {
                        let guard = lock.lock();
                        waiting.fetch_add(1, Ordering::SeqCst);
                        let _guard = condition.wait(guard);
                    })
                    .run()
            })
            .collect();

        // `waiting` is bumped under the lock, before the wait enqueues; once
        // we take the lock ourselves all three are queued.
        while waiting.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }

        {
            let mut guard = lock.lock();
            condition.signal_all(&mut guard);
        }

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn condition_signal_is_not_retroactive() {
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let lock = Arc::new(Spinlock::new(()));
        let condition = Arc::new(Condition::new());

        // Signal with nobody waiting...
        {
            let mut guard = lock.lock();
            condition.signal(&mut guard);
        }

        // ...must not release a waiter that arrives afterwards.
        let woken = Arc::new(AtomicBool::new(false));
        let waiter = {
            let lock = Arc::clone(&lock);
            let condition = Arc::clone(&condition);
            let woken = Arc::clone(&woken);
            system
                .future(move || {
                    let guard = lock.lock();
                    let _guard = condition.wait(guard);
                    woken.store(true, Ordering::SeqCst);
                })
                .run()
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!woken.load(Ordering::SeqCst));

        {
            let mut guard = lock.lock();
            condition.signal(&mut guard);
        }
        waiter.join().unwrap();
        assert!(woken.load(Ordering::SeqCst));
    }

    #[test]
    fn kill_aborts_condition_wait_without_losing_signals() {
        let _trace = init_tracing();
        let system = FiberSystem::with_threads(2);
        system.fiberize();

        let lock = Arc::new(Spinlock::new(()));
        let condition = Arc::new(Condition::new());
        let waiting = Arc::new(AtomicUsize::new(0));

        let make_waiter = || {
            let lock = Arc::clone(&lock);
            let condition = Arc::clone(&condition);
            let waiting = Arc::clone(&waiting);
            system
                .future(move || {
                    let guard = lock.lock();
                    waiting.fetch_add(1, Ordering::SeqCst);
                    let _guard = condition.wait(guard);
                })
                .run()
        };

        let doomed = make_waiter();
        let survivor = make_waiter();

        while waiting.load(Ordering::SeqCst) < 2 {
            std::thread::sleep(Duration::from_millis(1));
        }

        // The killed waiter cedes its place in the queue; a single signal
        // must still reach the survivor no matter the queue order.
        doomed.kill();
        assert_eq!(doomed.join(), Err(TaskError::Killed));

        {
            let mut guard = lock.lock();
            condition.signal(&mut guard);
        }
        assert_eq!(survivor.join(), Ok(()));
    }

    #[test]
    fn spawn_from_plain_thread() {
        let system = FiberSystem::with_threads(2);
        let handle = system.handle();

        // Spawning does not require an adopted thread.
        let spawned = std::thread::spawn(move || handle.future(|| 5).run())
            .join()
            .unwrap();

        system.fiberize();
        assert_eq!(spawned.join(), Ok(5));
    }

    #[test]
    fn yield_interleaves_tasks() {
        let system = FiberSystem::with_threads(1);
        system.fiberize();

        // Two yielding tasks on one worker must both make progress.
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                system
                    .future(|| {
                        for _ in 0..1_000 {
                            context::yield_now();
                        }
                    })
                    .run()
            })
            .collect();

        for task in tasks {
            assert_eq!(task.join(), Ok(()));
        }
    }
}
