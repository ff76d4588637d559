// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Typed, path-addressed events.

use crate::context;
use crate::handler::HandlerRef;
use crate::path::{Ident, Path, unique_ident};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

/// A typed event handle.
///
/// An event is nothing but a [`Path`] plus a phantom payload type; two events
/// are equal iff their paths are equal. Handles are freely clonable and
/// sendable; delivering a value requires a [`FiberRef`](crate::FiberRef) to
/// address the receiving task.
pub struct Event<A> {
    path: Path,
    _marker: PhantomData<fn(A) -> A>,
}

impl<A> Event<A> {
    /// Creates a `/dev/null` event. Sends of this event are dropped.
    pub fn new() -> Self {
        Self::from_path(Path::DevNull)
    }

    /// Creates an event with the given global name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_path(Path::Global(Ident::Named(name.into())))
    }

    /// Creates an event with a freshly generated, process-unique identity.
    pub fn unique() -> Self {
        Self::from_path(Path::Global(unique_ident()))
    }

    /// Creates an event with the given path.
    pub fn from_path(path: Path) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Returns the path of this event.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<A: Send + 'static> Event<A> {
    /// Binds `handler` to this event in the currently running task.
    ///
    /// Handlers bound later fire first. The handler stays active until the
    /// last clone of the returned [`HandlerRef`] is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task.
    pub fn bind<F>(&self, handler: F) -> HandlerRef
    where
        F: Fn(&A) + 'static,
    {
        let callback: Rc<crate::handler::HandlerFn> = Rc::new(move |payload: &(dyn Any + Send)| {
            let value = payload
                .downcast_ref::<A>()
                .expect("event payload type mismatch");
            handler(value);
        });
        context::bind(self.path.clone(), callback)
    }

    /// Suspends the current task until this event is received, processing
    /// other events in the meantime, and returns the received value.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a task.
    pub fn wait(&self) -> A
    where
        A: Clone,
    {
        let fired = Rc::new(Cell::new(false));
        let value: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));

        let handler = self.bind({
            let fired = Rc::clone(&fired);
            let value = Rc::clone(&value);
            move |received: &A| {
                *value.borrow_mut() = Some(received.clone());
                fired.set(true);
            }
        });

        context::process_until(|| fired.get());
        handler.release();

        let received = value.borrow_mut().take();
        received.expect("event wait finished without a value")
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self::from_path(self.path.clone())
    }
}

impl<A> PartialEq for Event<A> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<A> Eq for Event<A> {}

impl<A> Hash for Event<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Event").field(&self.path).finish()
    }
}

/// The event that kills the receiving task by raising
/// [`Killed`](crate::Killed).
///
/// Every task installs a handler for it before its first dispatch, so
/// receiving it aborts waits and unwinds user code. [`FiberRef::kill`]
/// (crate::FiberRef::kill) is shorthand for sending it.
pub fn kill_event() -> Event<()> {
    Event::named("kill")
}

/// The in-mailbox representation of a sent event: a path plus the owned,
/// type-erased payload.
pub struct PendingEvent {
    path: Path,
    payload: Box<dyn Any + Send>,
}

impl PendingEvent {
    pub(crate) fn new(path: Path, payload: Box<dyn Any + Send>) -> Self {
        Self { path, payload }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn payload(&self) -> &(dyn Any + Send) {
        self.payload.as_ref()
    }
}

impl fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEvent")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_path() {
        let a: Event<u32> = Event::named("a");
        let b: Event<u32> = Event::named("a");
        let c: Event<u32> = Event::named("c");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Event::<u32>::new(), Event::named("a"));
        assert_eq!(Event::<u32>::new(), Event::<u32>::new());
    }

    #[test]
    fn unique_events_differ() {
        assert_ne!(Event::<u32>::unique(), Event::<u32>::unique());
    }

    #[test]
    fn kill_event_is_global() {
        assert_eq!(
            kill_event().path(),
            &Path::Global(Ident::Named("kill".into()))
        );
    }
}
