// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! weft — a user-space fiber/actor runtime.
//!
//! weft multiplexes many lightweight tasks onto a small pool of worker
//! threads. Tasks are stackful coroutines (built on the [`coro`] crate): they
//! suspend on events, promises and user-space locks without blocking their
//! worker, and idle workers steal runnable tasks from their peers. Tasks
//! communicate through typed [`Event`]s delivered to per-task mailboxes and
//! addressed by [`Path`] equality.
//!
//! # Example
//!
//! ```
//! use weft::{Event, FiberSystem, context};
//!
//! let system = FiberSystem::with_threads(2);
//! system.fiberize(); // adopt this thread so it can talk to tasks
//!
//! let question: Event<u64> = Event::unique();
//!
//! let answerer = system
//!     .future({
//!         let question = question.clone();
//!         move || question.wait() + 1
//!     })
//!     .run();
//!
//! answerer.send(&question, 41);
//! assert_eq!(answerer.join(), Ok(42));
//! ```
//!
//! # Tasks
//!
//! A *fiber* ([`FiberSystem::fiber`]) is a task with no observable result; a
//! *future* ([`FiberSystem::future`]) additionally completes a [`Promise`]
//! with its return value (or with the reason it unwound), observable through
//! [`FutureRef::join`]. Inside a task the [`context`] functions provide
//! yielding, event processing and self-reference. Threads outside the system
//! join in via [`FiberSystem::fiberize`].

mod builder;
pub mod context;
mod error;
mod event;
mod fiber_ref;
mod handler;
pub mod io;
mod mailbox;
mod path;
mod scheduler;
mod scoped_pin;
mod stack_pool;
pub mod sync;
mod system;
mod task;

pub use builder::{FiberBuilder, FutureBuilder};
pub use error::{Killed, TaskError, TaskResult};
pub use event::{Event, PendingEvent, kill_event};
pub use fiber_ref::{FiberRef, FutureRef};
pub use handler::HandlerRef;
pub use path::{Ident, Path};
pub use scoped_pin::ScopedPin;
pub use sync::{Condition, Mutex, Promise, Spinlock, SpinlockGuard};
pub use system::{FiberSystem, SystemHandle};
