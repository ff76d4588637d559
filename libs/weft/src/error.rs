// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Result of a [`Future`](crate::FutureRef) task: either the value produced by
/// its body, or the reason it failed to produce one.
pub type TaskResult<A> = Result<A, TaskError>;

/// Marker raised through a task when it receives the built-in `kill` event.
///
/// The kill handler raises this by unwinding, so it aborts whatever the task
/// was doing, including waits inside [`process_until`](crate::context::process_until)
/// and [`Event::wait`](crate::Event::wait). A fiber swallows it silently; a
/// future reports it as [`TaskError::Killed`] through its promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Killed;

impl fmt::Display for Killed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task was killed")
    }
}

impl core::error::Error for Killed {}

/// Why a task failed to produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task received the `kill` event.
    Killed,

    /// The task's body panicked. Carries the rendered panic message; the
    /// payload itself is consumed by the trampoline.
    Panicked(Arc<str>),

    /// The awaited reference points at no task. Produced by joining a
    /// dev-null [`FutureRef`](crate::FutureRef), e.g. one returned by `run()`
    /// after the system started shutting down.
    NullAwaitable,
}

impl TaskError {
    /// Converts a payload caught by `catch_unwind` into a task error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if payload.is::<Killed>() {
            return TaskError::Killed;
        }
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("task panicked")
        };
        TaskError::Panicked(message)
    }

    pub fn is_killed(&self) -> bool {
        matches!(self, TaskError::Killed)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Killed => f.write_str("task was killed"),
            TaskError::Panicked(message) => write!(f, "task panicked: {message}"),
            TaskError::NullAwaitable => {
                f.write_str("the awaitable will never yield a value")
            }
        }
    }
}

impl core::error::Error for TaskError {}

impl From<Killed> for TaskError {
    fn from(_: Killed) -> Self {
        TaskError::Killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_conversion() {
        assert_eq!(
            TaskError::from_panic(Box::new(Killed)),
            TaskError::Killed
        );
        assert_eq!(
            TaskError::from_panic(Box::new("boom")),
            TaskError::Panicked(Arc::from("boom"))
        );
        assert_eq!(
            TaskError::from_panic(Box::new(String::from("boom"))),
            TaskError::Panicked(Arc::from("boom"))
        );
        assert_eq!(
            TaskError::from_panic(Box::new(42_u32)),
            TaskError::Panicked(Arc::from("task panicked"))
        );
    }
}
