// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stackful coroutines for the weft runtime.
//!
//! This crate provides [`Coroutine`], a one-shot [stackful coroutine] running on
//! its own [`Stack`]. It is the context-switching substrate underneath weft's
//! task scheduler: the scheduler [`resume`]s a task's coroutine on whatever
//! worker thread currently owns it, and the task [`suspend`]s back to exactly
//! that resume call. The parent link that makes this work is re-written on
//! every switch-in, so a coroutine may be resumed from a *different* thread
//! each time without any further coordination.
//!
//! The switching code is derived from [`corosensei`] by Amanieu d'Antras.
//!
//! [stackful coroutine]: https://en.wikipedia.org/wiki/Coroutine
//! [`corosensei`]: https://github.com/Amanieu/corosensei
//! [`resume`]: Coroutine::resume
//! [`suspend`]: Yielder::suspend

mod arch;
pub mod stack;
mod utils;

use crate::stack::{Stack, StackPointer};
use crate::utils::EncodedValue;
use core::cell::Cell;
use core::marker::PhantomData;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::panic::AssertUnwindSafe;
use core::ptr;

/// Value returned from resuming a coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit<Yield, Return> {
    /// The coroutine suspended itself through a [`Yielder`].
    Yielded(Yield),

    /// The coroutine returned from its entry closure and cannot be resumed
    /// again.
    Returned(Return),
}

impl<Yield, Return> Exit<Yield, Return> {
    pub fn yielded(self) -> Option<Yield> {
        match self {
            Exit::Yielded(val) => Some(val),
            Exit::Returned(_) => None,
        }
    }

    pub fn returned(self) -> Option<Return> {
        match self {
            Exit::Yielded(_) => None,
            Exit::Returned(val) => Some(val),
        }
    }
}

/// A one-shot coroutine with its own stack.
///
/// `Input` is passed into every [`resume`](Self::resume) call and comes out of
/// the matching [`Yielder::suspend`]; `Yield` travels the opposite way.
pub struct Coroutine<Input, Yield, Return, S: Stack> {
    /// Stack that the coroutine is executing on.
    stack: S,
    /// Stack pointer at which the suspended state is held, `None` once the
    /// coroutine has returned.
    stack_ptr: Option<StackPointer>,
    /// The stack pointer produced by initialization. A coroutine can never
    /// revert to it (suspending pushes state), so comparing against it tells
    /// us whether the coroutine has ever been resumed.
    initial_stack_ptr: StackPointer,
    /// We want to be covariant over Yield and Return, and contravariant
    /// over Input.
    _m1: PhantomData<fn(Input) -> Exit<Yield, Return>>,
    /// A suspended coroutine is pinned to its stack; the handle must not be
    /// Send or Sync. The runtime hands coroutines between worker threads only
    /// through owned moves ordered by the task lock.
    _m2: PhantomData<*mut ()>,
}

impl<Input, Yield, Return, S: Stack> Coroutine<Input, Yield, Return, S> {
    /// Creates a new coroutine executing `func` on the provided [`Stack`].
    ///
    /// The closure runs on the first [`resume`](Self::resume). It must not
    /// unwind; if it does, the process is aborted. Callers that may unwind
    /// (anything running user code) are expected to wrap their body in
    /// [`std::panic::catch_unwind`].
    pub fn with_stack<F>(stack: S, func: F) -> Self
    where
        F: FnOnce(Input, &Yielder<Input, Yield>) -> Return,
        F: 'static,
        Input: 'static,
        Yield: 'static,
        Return: 'static,
    {
        unsafe extern "C" fn entry<Input, Yield, Return, F>(
            input: EncodedValue,
            parent_link: &mut StackPointer,
            obj: *mut MaybeUninit<F>,
        ) -> !
        where
            F: FnOnce(Input, &Yielder<Input, Yield>) -> Return,
        {
            // Safety: the pointers were set up by init_stack and are only ever
            // handed to this entry function once.
            unsafe {
                // The yielder is a #[repr(transparent)] wrapper around the
                // parent link on the stack.
                let yielder = &*(ptr::from_mut(parent_link).cast::<Yielder<Input, Yield>>());

                // Read the entry closure from the stack.
                debug_assert_eq!(obj as usize % align_of::<F>(), 0);
                let func = obj.as_ref().unwrap_unchecked();

                let input: Input = utils::decode_val(input);

                // Unwinding through the context-switch assembly is not
                // supported; turn an escaping panic into an abort.
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    func.assume_init_read()(input, yielder)
                }))
                .unwrap_or_else(|_| std::process::abort());

                // Hand the return value to the parent context and mark the
                // coroutine as done.
                let mut result = ManuallyDrop::new(result);
                arch::switch_and_reset(utils::encode_val(&mut result), yielder.stack_ptr.as_ptr());
            }
        }

        // Safety: the stack is unused and large enough for the initial record
        // (checked by allocate_obj_on_stack).
        unsafe {
            // Set up the stack so that the coroutine starts executing `entry`.
            // The closure is written to the stack so its address can be passed
            // to `entry` on the first resume.
            let (stack_ptr, _init_obj) = arch::init_stack(
                &stack,
                entry::<Input, Yield, Return, F>,
                MaybeUninit::new(func),
            );

            Self {
                stack,
                stack_ptr: Some(stack_ptr),
                initial_stack_ptr: stack_ptr,
                _m1: PhantomData,
                _m2: PhantomData,
            }
        }
    }

    /// Resumes the coroutine, passing `input` to it.
    ///
    /// Returns [`Exit::Yielded`] when the coroutine suspends and
    /// [`Exit::Returned`] when its entry closure returns.
    ///
    /// # Panics
    ///
    /// Panics if the coroutine has already returned.
    pub fn resume(&mut self, input: Input) -> Exit<Yield, Return> {
        let mut input = ManuallyDrop::new(input);

        let stack_ptr = self
            .stack_ptr
            .take()
            .expect("attempt to resume a completed coroutine");

        // Safety: `stack_ptr` points at a validly suspended context on our
        // own stack.
        unsafe {
            let (result, stack_ptr) =
                arch::switch_and_link(utils::encode_val(&mut input), stack_ptr, self.stack.top());

            self.stack_ptr = stack_ptr;

            if stack_ptr.is_some() {
                Exit::Yielded(utils::decode_val(result))
            } else {
                Exit::Returned(utils::decode_val(result))
            }
        }
    }

    /// Returns whether this coroutine has been resumed at least once.
    pub fn started(&self) -> bool {
        self.stack_ptr != Some(self.initial_stack_ptr)
    }

    /// Returns whether this coroutine has finished executing.
    pub fn done(&self) -> bool {
        self.stack_ptr.is_none()
    }

    /// Recovers the stack of a completed coroutine, e.g. to return it to a
    /// stack pool.
    ///
    /// # Panics
    ///
    /// Panics if the coroutine has not finished executing.
    pub fn into_stack(self) -> S {
        assert!(self.done(), "coroutine is still live");
        let this = ManuallyDrop::new(self);
        // Safety: `this` is never touched again and its drop impl is
        // suppressed, so the stack has a single owner.
        unsafe { ptr::read(&raw const this.stack) }
    }
}

impl<Input, Yield, Return, S: Stack> Drop for Coroutine<Input, Yield, Return, S> {
    fn drop(&mut self) {
        // A live coroutine holds frames we cannot unwind from the outside.
        // Dropping one releases the stack without running those destructors;
        // the runtime only does this during teardown of tasks that will never
        // run again.
    }
}

/// Handle used by a coroutine to suspend itself.
///
/// Internally this is just the parent link on the coroutine stack, which is
/// updated every time [`Coroutine::resume`] is called. Its address is stable
/// for the whole life of the coroutine.
#[repr(transparent)]
pub struct Yielder<Input, Yield> {
    stack_ptr: Cell<StackPointer>,
    marker: PhantomData<fn(Yield) -> Input>,
}

impl<Input, Yield> Yielder<Input, Yield> {
    /// Suspends the calling coroutine, handing `val` to the original caller of
    /// [`Coroutine::resume`]. Returns the input of the next resume.
    pub fn suspend(&self, val: Yield) -> Input {
        // Safety: we are executing on the coroutine stack that `stack_ptr`
        // links out of, which is exactly the state switch_yield expects.
        unsafe {
            let mut val = ManuallyDrop::new(val);
            let result = arch::switch_yield(utils::encode_val(&mut val), self.stack_ptr.as_ptr());

            utils::decode_val(result)
        }
    }
}
