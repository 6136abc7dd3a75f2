//! The exported allocator, for `LD_PRELOAD`.
//!
//! Everything here is a thin shim over [`HOOKS`]. The allocating entry
//! points are naked trampolines (see `arch::callsite`) so the footer records
//! the address of the actual caller rather than one of ours.

use std::mem;

use libc::{c_int, c_void, size_t};

use crate::{
    alloc::{
        hooks::{Hooks, ThrowFn},
        resolver::NextInLinkOrder,
    },
    arch::callsite::callsite_trampoline,
};

cfg_if::cfg_if! {
    if #[cfg(feature = "counters")] {
        use crate::alloc::counters::LiveCounters;

        /// The process-wide allocator hooks
        pub static HOOKS: Hooks<NextInLinkOrder, LiveCounters> =
            Hooks::new(NextInLinkOrder, LiveCounters::new());

        /// Current live allocation and byte counts. Either pointer may be
        /// null.
        ///
        /// # Safety
        ///
        /// Non-null pointers must be valid for writes
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn hookalloc_live_counts(allocs: *mut i64, bytes: *mut i64) {
            let counts = HOOKS.tally().snapshot();
            if !allocs.is_null() {
                *allocs = counts.allocs;
            }
            if !bytes.is_null() {
                *bytes = counts.bytes;
            }
        }
    } else {
        use crate::alloc::counters::NoTally;

        /// The process-wide allocator hooks
        pub static HOOKS: Hooks<NextInLinkOrder, NoTally> = Hooks::new(NextInLinkOrder, NoTally);
    }
}

callsite_trampoline! {
    pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void
        => malloc_at, site in 1;
    pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void
        => calloc_at, site in 2;
    pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void
        => realloc_at, site in 2;
    pub unsafe extern "C" fn reallocarray(ptr: *mut c_void, count: size_t, size: size_t) -> *mut c_void
        => reallocarray_at, site in 3;
    pub unsafe extern "C" fn memalign(align: size_t, size: size_t) -> *mut c_void
        => memalign_at, site in 2;
    pub unsafe extern "C" fn aligned_alloc(align: size_t, size: size_t) -> *mut c_void
        => aligned_alloc_at, site in 2;
    pub unsafe extern "C" fn valloc(size: size_t) -> *mut c_void
        => valloc_at, site in 1;
    pub unsafe extern "C" fn posix_memalign(out: *mut *mut c_void, align: size_t, size: size_t) -> c_int
        => posix_memalign_at, site in 3;
    /// `operator new(std::size_t)`
    #[allow(non_snake_case)]
    pub unsafe extern "C-unwind" fn _Znwm(size: size_t) -> *mut c_void
        => operator_new_at, site in 1;
    /// `operator new[](std::size_t)`
    #[allow(non_snake_case)]
    pub unsafe extern "C-unwind" fn _Znam(size: size_t) -> *mut c_void
        => operator_new_at, site in 1;
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    HOOKS.free(ptr)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> size_t {
    HOOKS.usable_size(ptr)
}

unsafe extern "C" fn malloc_at(size: size_t, site: usize) -> *mut c_void {
    HOOKS.malloc(size, site)
}

unsafe extern "C" fn calloc_at(count: size_t, size: size_t, site: usize) -> *mut c_void {
    HOOKS.calloc(count, size, site)
}

unsafe extern "C" fn realloc_at(ptr: *mut c_void, size: size_t, site: usize) -> *mut c_void {
    HOOKS.realloc(ptr, size, site)
}

unsafe extern "C" fn reallocarray_at(
    ptr: *mut c_void,
    count: size_t,
    size: size_t,
    site: usize,
) -> *mut c_void {
    HOOKS.reallocarray(ptr, count, size, site)
}

unsafe extern "C" fn memalign_at(align: size_t, size: size_t, site: usize) -> *mut c_void {
    HOOKS.memalign(align, size, site)
}

unsafe extern "C" fn aligned_alloc_at(align: size_t, size: size_t, site: usize) -> *mut c_void {
    HOOKS.aligned_alloc(align, size, site)
}

unsafe extern "C" fn valloc_at(size: size_t, site: usize) -> *mut c_void {
    HOOKS.valloc(size, site)
}

unsafe extern "C" fn posix_memalign_at(
    out: *mut *mut c_void,
    align: size_t,
    size: size_t,
    site: usize,
) -> c_int {
    HOOKS.posix_memalign(out, align, size, site)
}

unsafe extern "C-unwind" fn operator_new_at(size: size_t, site: usize) -> *mut c_void {
    HOOKS.operator_new_or_throw(size, site, cxx_bad_alloc)
}

/// `std::__throw_bad_alloc()` from the host's C++ runtime, if one is loaded
fn cxx_bad_alloc() -> Option<ThrowFn> {
    // SAFETY: NUL-terminated name
    let throw = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"_ZSt17__throw_bad_allocv".as_ptr()) };
    // SAFETY: `std::__throw_bad_alloc()` takes nothing and never returns
    (!throw.is_null()).then(|| unsafe { mem::transmute::<*mut c_void, ThrowFn>(throw) })
}
