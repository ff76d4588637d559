// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Event handlers and the per-task handler registry.
//!
//! Handlers are owned by the task that bound them and are only ever touched
//! by that task's own code, so the registry needs no locking. A handler stays
//! alive as long as at least one [`HandlerRef`] points at it; once the last
//! ref drops the handler is *destroyed* (its closure is released immediately,
//! its registry slot is compacted out lazily before the next dispatch of its
//! path).

use crate::path::Path;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// A type-erased handler callback. Receives a borrow of the event payload;
/// multiple handlers may observe the same payload.
pub(crate) type HandlerFn = dyn Fn(&(dyn Any + Send));

pub(crate) struct HandlerSlot {
    /// Number of live [`HandlerRef`]s. The registry's own pointer does not
    /// count; a handler nobody references is garbage.
    refs: Cell<u64>,
    callback: RefCell<Option<Rc<HandlerFn>>>,
}

impl HandlerSlot {
    fn new(callback: Rc<HandlerFn>) -> Rc<Self> {
        Rc::new(Self {
            refs: Cell::new(0),
            callback: RefCell::new(Some(callback)),
        })
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.refs.get() == 0
    }

    /// Returns the callback if the handler is still alive.
    pub(crate) fn callback(&self) -> Option<Rc<HandlerFn>> {
        self.callback.borrow().clone()
    }

    fn grab(&self) {
        self.refs.set(self.refs.get() + 1);
    }

    fn release(&self) {
        let refs = self.refs.get() - 1;
        self.refs.set(refs);
        if refs == 0 {
            // Destroyed: release the closure right away, the registry slot is
            // compacted out by the next dispatch.
            self.callback.borrow_mut().take();
        }
    }
}

/// Keeps a bound handler alive.
///
/// Dropping (or explicitly [`release`](Self::release)-ing) the last ref for a
/// handler destroys it. Handler refs belong to the task that bound them and
/// are not sendable.
pub struct HandlerRef {
    slot: Rc<HandlerSlot>,
}

impl HandlerRef {
    fn new(slot: Rc<HandlerSlot>) -> Self {
        slot.grab();
        Self { slot }
    }

    /// Drops this reference. Equivalent to `drop`, provided for symmetry with
    /// handler bookkeeping in user code.
    pub fn release(self) {}
}

impl Clone for HandlerRef {
    fn clone(&self) -> Self {
        Self::new(Rc::clone(&self.slot))
    }
}

impl Drop for HandlerRef {
    fn drop(&mut self) {
        self.slot.release();
    }
}

/// Ordered sequence of handlers bound to one path. New handlers are appended;
/// dispatch runs them most-recently-bound first.
pub(crate) type HandlerBlock = Vec<Rc<HandlerSlot>>;

/// The per-task handler registry.
#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) blocks: HashMap<Path, HandlerBlock>,
    /// Whether the built-in handlers (currently just `kill`) have been
    /// installed; done lazily before the first dispatch.
    pub(crate) standard_installed: bool,
    /// Keeps the built-in kill handler alive for the task's whole life.
    keep_alive: Vec<HandlerRef>,
}

impl Handlers {
    /// Appends `callback` to the block for `path` and returns a ref keeping
    /// it alive.
    pub(crate) fn bind(&mut self, path: Path, callback: Rc<HandlerFn>) -> HandlerRef {
        let slot = HandlerSlot::new(callback);
        self.blocks.entry(path).or_default().push(Rc::clone(&slot));
        HandlerRef::new(slot)
    }

    /// Binds a handler that stays alive for the life of the task.
    pub(crate) fn bind_permanent(&mut self, path: Path, callback: Rc<HandlerFn>) {
        let handler = self.bind(path, callback);
        self.keep_alive.push(handler);
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.keep_alive.clear();
        self.standard_installed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{Ident, Path};

    fn path() -> Path {
        Path::Global(Ident::Named("test".into()))
    }

    #[test]
    fn dropping_last_ref_destroys() {
        let mut handlers = Handlers::default();
        let handler = handlers.bind(path(), Rc::new(|_| {}));
        let clone = handler.clone();

        let slot = Rc::clone(&handlers.blocks[&path()][0]);
        assert!(!slot.is_destroyed());

        drop(handler);
        assert!(!slot.is_destroyed());
        clone.release();
        assert!(slot.is_destroyed());
        assert!(slot.callback().is_none());
    }

    #[test]
    fn bind_appends_in_order() {
        let mut handlers = Handlers::default();
        let _a = handlers.bind(path(), Rc::new(|_| {}));
        let _b = handlers.bind(path(), Rc::new(|_| {}));
        assert_eq!(handlers.blocks[&path()].len(), 2);
    }
}
