// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-worker cache of coroutine stacks.
//!
//! Mapping a fresh stack costs two syscalls; hot spawn/destroy loops recycle
//! stacks through this cache instead. Termination must use
//! [`delayed_deallocate`](StackPool::delayed_deallocate): the retire slot
//! defers reuse by one round so a stack is never handed out while the final
//! switch off of it may still be in flight.

use coro::stack::OsStack;

/// Usable size of a task stack.
pub(crate) const TASK_STACK_SIZE: usize = 128 * 1024;

/// Number of stacks cached regardless of load; beyond it the cache scales
/// with the number of stacks in use.
const MIN_CACHED: usize = 32;

pub(crate) struct StackPool {
    stack_size: usize,
    in_use: usize,
    cached: Vec<OsStack>,
    retired: Option<OsStack>,
}

impl StackPool {
    pub(crate) fn new() -> Self {
        Self::with_stack_size(TASK_STACK_SIZE)
    }

    pub(crate) fn with_stack_size(stack_size: usize) -> Self {
        Self {
            stack_size,
            in_use: 0,
            cached: Vec::new(),
            retired: None,
        }
    }

    /// Returns a stack, from the cache if possible.
    pub(crate) fn allocate(&mut self) -> OsStack {
        self.in_use += 1;
        self.cached
            .pop()
            .unwrap_or_else(|| {
                OsStack::new(self.stack_size).expect("failed to allocate coroutine stack")
            })
    }

    /// Returns a stack to the cache, or frees it if the cache is full.
    pub(crate) fn deallocate(&mut self, stack: OsStack) {
        self.in_use -= 1;

        if self.cached.len() < MIN_CACHED + self.in_use / 2 {
            self.cached.push(stack);
        } else {
            drop(stack);
        }
    }

    /// Retires a stack whose task is terminating. The stack is parked in a
    /// single retire slot and only becomes reusable when the *next* stack is
    /// retired, by which point the context switch off of it has completed.
    pub(crate) fn delayed_deallocate(&mut self, stack: OsStack) {
        if let Some(previous) = self.retired.replace(stack) {
            self.deallocate(previous);
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cached.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coro::stack::Stack;

    #[test]
    fn reuses_cached_stacks() {
        let mut pool = StackPool::with_stack_size(coro::stack::MIN_STACK_SIZE);

        let stack = pool.allocate();
        let top = stack.top();
        pool.deallocate(stack);

        let stack = pool.allocate();
        assert_eq!(stack.top(), top);
        pool.deallocate(stack);
    }

    #[test]
    fn retired_stack_is_not_reused_until_next_retire() {
        let mut pool = StackPool::with_stack_size(coro::stack::MIN_STACK_SIZE);

        let first = pool.allocate();
        let first_top = first.top();
        pool.delayed_deallocate(first);

        // The retired stack must not come back from allocate() yet.
        let other = pool.allocate();
        assert_ne!(other.top(), first_top);

        // Retiring another stack releases the first one into the cache.
        pool.delayed_deallocate(other);
        let recycled = pool.allocate();
        assert_eq!(recycled.top(), first_top);
    }

    #[test]
    fn cache_is_bounded() {
        let mut pool = StackPool::with_stack_size(coro::stack::MIN_STACK_SIZE);

        let stacks: Vec<_> = (0..100).map(|_| pool.allocate()).collect();
        for stack in stacks {
            pool.deallocate(stack);
        }

        // With nothing in use the cache holds at most MIN_CACHED + in_use/2
        // stacks; the rest were freed on the way in, so the bound is not
        // exactly MIN_CACHED but stays well below the 100 we returned.
        assert!(pool.cached_len() <= MIN_CACHED + 50);
        assert!(pool.cached_len() < 100);
    }
}
