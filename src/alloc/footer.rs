//! The metadata every real-allocator-backed block carries in its tail.
//!
//! ```plaintext
//! +--------------------+ <- ptr (what the caller gets)
//! | requested size     | alloc_size bytes
//! | bytes              |
//! +--------------------+
//! | slack (maybe none) |
//! +--------------------+ <- ptr + usable_size(ptr) - FOOTER_SIZE
//! | BlockFooter        |
//! +--------------------+ <- ptr + usable_size(ptr)
//! ```
//!
//! The footer sits against the end of what the allocator reports as usable,
//! not right after the requested bytes, so it can be found again from the
//! pointer alone. Every request is inflated by exactly [`FOOTER_SIZE`], which
//! guarantees the slot never overlaps the caller's bytes.

use std::{ffi::c_void, mem, slice};

use bytemuck::{Pod, Zeroable};

/// `malloc_usable_size()` of whichever allocator owns the block
pub type UsableSizeFn = unsafe extern "C" fn(*mut c_void) -> usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BlockFooter {
    /// Return address of the allocating call
    pub ret_addr: usize,
    /// The size the caller asked for
    pub alloc_size: usize,
}

pub const FOOTER_SIZE: usize = mem::size_of::<BlockFooter>();

/// What to actually ask the real allocator for. `None` if `size` is so large
/// that the request overflows, which the hooks report as `ENOMEM`.
pub const fn padded_size(size: usize) -> Option<usize> {
    size.checked_add(FOOTER_SIZE)
}

/// Offset of the footer from the start of a block with `usable` bytes
const fn footer_offset(usable: usize) -> usize {
    usable - FOOTER_SIZE
}

/// Write the footer for a fresh block and hand back the same pointer. A null
/// `ptr` means the allocation failed, and is returned untouched.
///
/// # Safety
///
/// - `ptr` is null or a live block of the allocator `usable_size` belongs to
/// - that block was requested with at least `padded_size(alloc_size)` bytes
pub unsafe fn tag(
    ptr: *mut c_void,
    usable_size: UsableSizeFn,
    ret_addr: usize,
    alloc_size: usize,
) -> *mut c_void {
    if ptr.is_null() {
        return ptr;
    }
    let usable = usable_size(ptr);
    debug_assert!(usable >= alloc_size + FOOTER_SIZE);
    let footer = BlockFooter {
        ret_addr,
        alloc_size,
    };
    // SAFETY: in bounds per the caller's contract. Usable sizes are only
    // guaranteed to be multiples of the word size, hence unaligned.
    unsafe {
        ptr.cast::<u8>()
            .add(footer_offset(usable))
            .cast::<BlockFooter>()
            .write_unaligned(footer)
    };
    ptr
}

/// Read the footer of a block previously passed through [`tag()`]. `None` if
/// the allocator reports a block too small to hold one.
///
/// # Safety
///
/// `ptr` is a live, tagged block of the allocator `usable_size` belongs to.
pub unsafe fn read(ptr: *mut c_void, usable_size: UsableSizeFn) -> Option<BlockFooter> {
    let usable = usable_size(ptr);
    if usable < FOOTER_SIZE {
        return None;
    }
    // SAFETY: the footer slot is inside the block
    let bytes = unsafe {
        slice::from_raw_parts(
            ptr.cast::<u8>().add(footer_offset(usable)).cast_const(),
            FOOTER_SIZE,
        )
    };
    Some(bytemuck::pod_read_unaligned(bytes))
}
