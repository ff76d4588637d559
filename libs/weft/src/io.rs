// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The interface to an external I/O backend.
//!
//! The core does not implement timers, sockets or files; it only demands
//! that each scheduler own a pollable [`IoContext`]. Multi-task workers
//! `poll` their context when idle and give it a throttled poll opportunity
//! after context switches; single-task schedulers park inside `run_loop`
//! and are woken through `stop_loop`.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// A per-scheduler I/O context.
///
/// Implementations wrap an event loop (the reference backend would be epoll
/// or similar). All methods may be called concurrently with `stop_loop`,
/// which is invoked from other threads to interrupt a blocking `run_loop`.
pub trait IoContext: Send + Sync {
    /// Runs the event loop once without blocking. Returns whether any work
    /// was done.
    fn poll(&self) -> bool;

    /// A budgeted poll, called from scheduler hot paths after context
    /// switches. Implementations should rate-limit the work done here.
    fn throttled_poll(&self) {
        self.poll();
    }

    /// Blocks running the event loop until [`stop_loop`](Self::stop_loop) is
    /// called. A stop request issued before entry makes it return
    /// immediately; the request is consumed on exit.
    fn run_loop(&self);

    /// Runs the event loop for one non-blocking pass.
    fn run_loop_no_wait(&self);

    /// Makes a concurrent (or future) [`run_loop`](Self::run_loop) return.
    fn stop_loop(&self);
}

/// Factory producing one [`IoContext`] per scheduler.
pub type IoFactory = Arc<dyn Fn() -> Box<dyn IoContext> + Send + Sync>;

/// The backend used when no real I/O backend is installed: `poll` never has
/// work, and `run_loop` simply parks the thread until `stop_loop`.
#[derive(Default)]
pub struct NullIo {
    stop_requested: Mutex<bool>,
    unparked: Condvar,
}

impl NullIo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoContext for NullIo {
    fn poll(&self) -> bool {
        false
    }

    fn throttled_poll(&self) {}

    fn run_loop(&self) {
        let mut stop_requested = self.stop_requested.lock();
        while !*stop_requested {
            self.unparked.wait(&mut stop_requested);
        }
        *stop_requested = false;
    }

    fn run_loop_no_wait(&self) {}

    fn stop_loop(&self) {
        let mut stop_requested = self.stop_requested.lock();
        *stop_requested = true;
        self.unparked.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn stop_before_run_returns_immediately() {
        let io = NullIo::new();
        io.stop_loop();
        io.run_loop();
    }

    #[test]
    fn stop_wakes_parked_loop() {
        let io = Arc::new(NullIo::new());
        let parked = Arc::clone(&io);
        let handle = std::thread::spawn(move || parked.run_loop());

        std::thread::sleep(Duration::from_millis(10));
        io.stop_loop();
        handle.join().unwrap();
    }
}
