// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Coroutine stacks.

use std::io::Error;
use std::ptr;

/// A stack pointer. Stacks grow downwards, so this is the *highest* address
/// in use by a suspended context.
pub type StackPointer = core::num::NonZeroUsize;

/// Minimum size of a stack, excluding guard pages.
pub const MIN_STACK_SIZE: usize = 4096;

/// Default usable size of an [`OsStack`].
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

pub use crate::arch::STACK_ALIGNMENT;

/// Memory that a [`Coroutine`](crate::Coroutine) can execute on.
///
/// # Safety
///
/// `top` and `bottom` must delimit an area of memory that is writable (except
/// for guard pages at the bottom), unaliased for the lifetime of the value,
/// and aligned to [`STACK_ALIGNMENT`].
pub unsafe trait Stack {
    /// Returns the highest address (start address) of the stack.
    fn top(&self) -> StackPointer;

    /// Returns the lowest address (maximum limit) of the stack, including any
    /// guard pages.
    fn bottom(&self) -> StackPointer;
}

/// A stack backed by `mmap`'d memory with a single `PROT_NONE` guard page at
/// the bottom.
pub struct OsStack {
    top: StackPointer,
    mmap_len: usize,
}

// Safety: the mapping is plain memory, owned exclusively by this value.
unsafe impl Send for OsStack {}

impl OsStack {
    /// Creates a new stack with at least `size` usable bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error if the mapping could not be created.
    pub fn new(size: usize) -> std::io::Result<Self> {
        // Apply minimum stack size.
        let size = size.max(MIN_STACK_SIZE);

        // Add a guard page to the requested size and round the size up to
        // a page boundary.
        let page_size = page_size();
        let mmap_len = size
            .checked_add(page_size + page_size - 1)
            .expect("integer overflow while calculating stack size")
            & !(page_size - 1);

        // OpenBSD requires MAP_STACK on anything that is used as a stack.
        cfg_if::cfg_if! {
            if #[cfg(target_os = "openbsd")] {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_STACK;
            } else {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
            }
        }

        // Safety: anonymous mapping with no requested address.
        unsafe {
            // Reserve some address space for the stack.
            let mmap = libc::mmap(ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
            if mmap == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            // Create the result here. If the mprotect call fails then this
            // will be dropped and the memory will be unmapped.
            let out = Self {
                top: StackPointer::new(mmap as usize + mmap_len).unwrap(),
                mmap_len,
            };

            // Make everything except the guard page writable.
            if libc::mprotect(
                mmap.cast::<u8>().add(page_size).cast(),
                mmap_len - page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            ) != 0
            {
                return Err(Error::last_os_error());
            }

            Ok(out)
        }
    }
}

impl Default for OsStack {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_SIZE).expect("failed to allocate stack")
    }
}

impl Drop for OsStack {
    fn drop(&mut self) {
        let mmap = self.top.get() - self.mmap_len;
        // Safety: unmapping the exact region this value owns.
        let ret = unsafe { libc::munmap(mmap as *mut libc::c_void, self.mmap_len) };
        debug_assert_eq!(ret, 0);
    }
}

// Safety: the mapping is page aligned (stricter than STACK_ALIGNMENT) and
// writable above the single guard page.
unsafe impl Stack for OsStack {
    fn top(&self) -> StackPointer {
        self.top
    }

    fn bottom(&self) -> StackPointer {
        StackPointer::new(self.top.get() - self.mmap_len).unwrap()
    }
}

fn page_size() -> usize {
    // Safety: sysconf is always safe to call.
    let pagesize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    assert!(pagesize.is_power_of_two());
    pagesize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_page_excluded() {
        let stack = OsStack::new(MIN_STACK_SIZE).unwrap();
        assert!(stack.top().get() - stack.bottom().get() >= 2 * MIN_STACK_SIZE);
        assert_eq!(stack.top().get() % STACK_ALIGNMENT, 0);
    }

    #[test]
    fn writable_to_the_top() {
        let stack = OsStack::new(MIN_STACK_SIZE).unwrap();
        // Safety: the top word of the stack is mapped read-write.
        unsafe {
            let top = (stack.top().get() as *mut usize).sub(1);
            top.write(0xdead_beef);
            assert_eq!(top.read(), 0xdead_beef);
        }
    }
}
