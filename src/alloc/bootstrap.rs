use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::{HookError, Result},
    util::{assert::within, num::align_up},
};

#[repr(C, align(16))]
struct Buf<const N: usize>([MaybeUninit<u8>; N]);

/// A simple stack allocator over a fixed buffer, used to serve whatever gets
/// allocated while the real allocator is still being looked up. Lock-free, so
/// any thread can use it in the middle of someone else's `dlsym()`.
///
/// `allocate()` is just a cursor bump and there is no `deallocate()`: blocks
/// carry no size and there's no free list, so they live as long as the
/// process.
pub struct BootstrapArena<const N: usize> {
    buf: UnsafeCell<Buf<N>>,
    cursor: AtomicUsize,
    allocs: AtomicUsize,
}

// SAFETY: every byte of `buf` is handed out at most once, the cursor decides
// who owns what
unsafe impl<const N: usize> Sync for BootstrapArena<N> {}

impl<const N: usize> BootstrapArena<N> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new(Buf([MaybeUninit::uninit(); N])),
            cursor: AtomicUsize::new(0),
            allocs: AtomicUsize::new(0),
        }
    }

    fn base(&self) -> *mut u8 {
        self.buf.get().cast()
    }

    /// Take `size` fresh bytes aligned to `align` (a power of two). A zero
    /// `size` still consumes a byte, so every pointer handed out is one that
    /// [`Self::owns()`] recognizes.
    pub fn bump_allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        let base = self.base() as usize;
        let size = size.max(1);
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        loop {
            let exhausted = HookError::BootstrapExhausted {
                requested: size,
                remaining: N - cursor,
            };
            let start = align_up(base + cursor, align).ok_or(exhausted)? - base;
            let end = start.checked_add(size).ok_or(exhausted)?;
            if end > N {
                return Err(exhausted);
            }
            match self.cursor.compare_exchange_weak(
                cursor,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.allocs.fetch_add(1, Ordering::Relaxed);
                    // SAFETY: `start < end <= N`, inside `buf`
                    return Ok(unsafe { NonNull::new_unchecked(self.base().add(start)) });
                }
                Err(current) => cursor = current,
            }
        }
    }

    /// Is `ptr` inside the part of the buffer handed out so far?
    pub fn owns<T>(&self, ptr: *const T) -> bool {
        within(ptr, self.base(), self.used())
    }

    /// Bytes from `ptr` to the cursor. An upper bound on the size of the
    /// block at `ptr`, which is all anyone can know about it.
    ///
    /// # Panics
    ///
    /// In debug mode if `ptr` is not owned by this arena
    pub fn span_from<T>(&self, ptr: *const T) -> usize {
        debug_assert!(self.owns(ptr));
        self.base() as usize + self.used() - ptr as usize
    }

    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        N - self.used()
    }

    /// Number of allocations served
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for BootstrapArena<N> {
    fn default() -> Self {
        Self::new()
    }
}
