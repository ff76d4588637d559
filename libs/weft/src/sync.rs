// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronization primitives built on the scheduler.
//!
//! [`Mutex`], [`Condition`] and [`Promise`] suspend *fibers*, not OS threads:
//! a task blocked on any of them keeps processing its events and releases its
//! worker for other tasks. [`Spinlock`] is the low-level lock the runtime
//! itself is built on.

pub(crate) mod condition;
pub(crate) mod mutex;
pub(crate) mod promise;
pub(crate) mod spinlock;

pub use condition::Condition;
pub use mutex::Mutex;
pub use promise::Promise;
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};
