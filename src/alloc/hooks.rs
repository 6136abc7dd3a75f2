//! The allocator entry points, minus the ABI plumbing.
//!
//! Every allocating hook does the same dance: inflate the request by
//! [`FOOTER_SIZE`], ask the [`Resolver`] where to go, forward to the real
//! function (or the bootstrap arena mid-resolution), then [`footer::tag()`]
//! the result. Bootstrap blocks are never tagged or counted, they have no
//! usable size to hang a footer off.
//!
//! The `site` arguments are the return address of whoever called the
//! exported function. See `arch::callsite`.

use std::{
    alloc::{handle_alloc_error, GlobalAlloc, Layout},
    mem,
    ptr::{self, NonNull},
};

use libc::{c_int, c_void};

use super::{
    bootstrap::BootstrapArena,
    counters::Tally,
    footer::{self, padded_size, FOOTER_SIZE},
    resolver::{AllocatorTable, Resolver, Route, SymbolSource},
};
use crate::{
    config::{BOOTSTRAP_ALIGN, BOOTSTRAP_CAPACITY},
    error::fatal,
    hook_trace,
    os::mem::{page_size, set_errno},
    util::hint::cold,
};

/// Largest alignment the real `malloc()` guarantees on its own
const MALLOC_ALIGN: usize = 2 * mem::size_of::<usize>();

/// Something like `std::__throw_bad_alloc()`: takes nothing, never returns,
/// unwinds into whoever called `operator new`
pub type ThrowFn = unsafe extern "C-unwind" fn() -> !;

#[cold]
fn enomem() -> *mut c_void {
    set_errno(libc::ENOMEM);
    ptr::null_mut()
}

pub struct Hooks<S, T> {
    resolver: Resolver<S>,
    bootstrap: BootstrapArena<BOOTSTRAP_CAPACITY>,
    tally: T,
}

impl<S, T> Hooks<S, T>
where
    S: SymbolSource,
    T: Tally,
{
    pub const fn new(source: S, tally: T) -> Self {
        Self {
            resolver: Resolver::new(source),
            bootstrap: BootstrapArena::new(),
            tally,
        }
    }

    pub fn resolver(&self) -> &Resolver<S> {
        &self.resolver
    }

    pub fn bootstrap(&self) -> &BootstrapArena<BOOTSTRAP_CAPACITY> {
        &self.bootstrap
    }

    pub fn tally(&self) -> &T {
        &self.tally
    }

    fn route(&self) -> Route<'_> {
        self.resolver
            .ensure_resolved()
            .unwrap_or_else(|e| fatal(e))
    }

    /// The real allocator, for a pointer that did not come from the
    /// bootstrap arena. A real block implies resolution finished long ago,
    /// `None` only for a foreign pointer showing up mid-resolution.
    fn real(&self) -> Option<&AllocatorTable> {
        match self.resolver.resolved() {
            Some(table) => Some(table),
            None => match self.route() {
                Route::Real(table) => Some(table),
                Route::Bootstrap => None,
            },
        }
    }

    fn bootstrap_alloc(&self, size: usize, align: usize) -> *mut c_void {
        match self.bootstrap.bump_allocate(size, align) {
            Ok(p) => {
                hook_trace!("bootstrap alloc {size} bytes at {p:p}");
                p.as_ptr().cast()
            }
            Err(e) => fatal(e),
        }
    }

    /// Tag and count a block fresh from the real allocator
    fn finish(
        &self,
        table: &AllocatorTable,
        ptr: *mut c_void,
        site: usize,
        size: usize,
    ) -> *mut c_void {
        if ptr.is_null() {
            return ptr;
        }
        // SAFETY: every caller requested `padded_size(size)` from `table`
        let ptr = unsafe { footer::tag(ptr, table.usable_size, site, size) };
        self.tally.on_alloc(size);
        ptr
    }

    pub fn malloc(&self, size: usize, site: usize) -> *mut c_void {
        let Some(padded) = padded_size(size) else {
            return enomem();
        };
        match self.route() {
            // SAFETY: plain C call
            Route::Real(table) => self.finish(table, unsafe { (table.malloc)(padded) }, site, size),
            Route::Bootstrap => self.bootstrap_alloc(size, BOOTSTRAP_ALIGN),
        }
    }

    pub fn calloc(&self, count: usize, size: usize, site: usize) -> *mut c_void {
        hook_trace!("calloc({count}, {size})");
        let Some((total, padded)) = count
            .checked_mul(size)
            .and_then(|total| Some((total, padded_size(total)?)))
        else {
            return enomem();
        };
        match self.route() {
            Route::Real(table) => {
                // SAFETY: plain C call
                self.finish(table, unsafe { (table.calloc)(1, padded) }, site, total)
            }
            Route::Bootstrap => {
                let p = self.bootstrap_alloc(total, BOOTSTRAP_ALIGN);
                // SAFETY: fresh block of `total` bytes
                unsafe { ptr::write_bytes(p.cast::<u8>(), 0, total) };
                p
            }
        }
    }

    /// # Safety
    ///
    /// `ptr` is null or a live block from one of these hooks
    pub unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        if self.bootstrap.owns(ptr) {
            hook_trace!("free. bootstrap block {ptr:p}");
            return;
        }
        let Some(table) = self.real() else {
            hook_trace!("free. foreign block {ptr:p} during resolution, leaked");
            return;
        };
        if T::ENABLED {
            if let Some(footer) = footer::read(ptr, table.usable_size) {
                self.tally.on_free(footer.alloc_size);
            }
        }
        (table.free)(ptr)
    }

    /// # Safety
    ///
    /// `ptr` is null or a live block from one of these hooks
    pub unsafe fn realloc(&self, ptr: *mut c_void, size: usize, site: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.malloc(size, site);
        }
        if self.bootstrap.owns(ptr) {
            return cold(|| self.realloc_bootstrap(ptr, size, site));
        }
        if size == 0 {
            // glibc frees and returns null here, so do we
            self.free(ptr);
            return ptr::null_mut();
        }
        let Some(padded) = padded_size(size) else {
            return enomem();
        };
        let Some(table) = self.real() else {
            return enomem();
        };
        let old = if T::ENABLED {
            footer::read(ptr, table.usable_size).map_or(0, |f| f.alloc_size)
        } else {
            0
        };
        let new = (table.realloc)(ptr, padded);
        if new.is_null() {
            return new;
        }
        let new = footer::tag(new, table.usable_size, site, size);
        self.tally.on_resize(old, size);
        new
    }

    /// Bootstrap blocks can't be handed to the real `realloc()`. Move the
    /// contents into a fresh block instead, copying as much of the old block
    /// as there could have been.
    unsafe fn realloc_bootstrap(&self, ptr: *mut c_void, size: usize, site: usize) -> *mut c_void {
        // Measured before allocating: mid-resolution the new block comes from
        // the arena too, right behind the cursor.
        let avail = self.bootstrap.span_from(ptr);
        let new = self.malloc(size, site);
        if !new.is_null() {
            // SAFETY: `[ptr, ptr + avail)` ends at the old cursor and `new`
            // starts at or after it
            ptr::copy_nonoverlapping(ptr.cast::<u8>(), new.cast::<u8>(), size.min(avail));
        }
        new
    }

    /// `reallocarray()`: `realloc()` with an overflow check on `count * size`
    ///
    /// # Safety
    ///
    /// Same as [`Self::realloc()`]
    pub unsafe fn reallocarray(
        &self,
        ptr: *mut c_void,
        count: usize,
        size: usize,
        site: usize,
    ) -> *mut c_void {
        match count.checked_mul(size) {
            Some(total) => self.realloc(ptr, total, site),
            None => enomem(),
        }
    }

    pub fn memalign(&self, align: usize, size: usize, site: usize) -> *mut c_void {
        let Some(padded) = padded_size(size) else {
            return enomem();
        };
        match self.route() {
            // SAFETY: plain C call
            Route::Real(table) => {
                self.finish(table, unsafe { (table.memalign)(align, padded) }, site, size)
            }
            Route::Bootstrap => {
                // memalign() rounds odd alignments up rather than failing
                let align = align.checked_next_power_of_two().unwrap_or(usize::MAX / 2 + 1);
                self.bootstrap_alloc(size, align.max(BOOTSTRAP_ALIGN))
            }
        }
    }

    /// C11 `aligned_alloc()`, the `memalign()` path with glibc's alignment
    /// check in front
    pub fn aligned_alloc(&self, align: usize, size: usize, site: usize) -> *mut c_void {
        if !align.is_power_of_two() {
            set_errno(libc::EINVAL);
            return ptr::null_mut();
        }
        self.memalign(align, size, site)
    }

    pub fn valloc(&self, size: usize, site: usize) -> *mut c_void {
        let Some(padded) = padded_size(size) else {
            return enomem();
        };
        match self.route() {
            // SAFETY: plain C call
            Route::Real(table) => self.finish(table, unsafe { (table.valloc)(padded) }, site, size),
            Route::Bootstrap => self.bootstrap_alloc(size, page_size()),
        }
    }

    /// Status codes are passed through untouched, `*out` is only tagged on
    /// success.
    ///
    /// # Safety
    ///
    /// `out` is valid for writes
    pub unsafe fn posix_memalign(
        &self,
        out: *mut *mut c_void,
        align: usize,
        size: usize,
        site: usize,
    ) -> c_int {
        let Some(padded) = padded_size(size) else {
            return libc::ENOMEM;
        };
        match self.route() {
            Route::Real(table) => {
                let rc = (table.posix_memalign)(out, align, padded);
                if rc == 0 {
                    *out = self.finish(table, *out, site, size);
                }
                rc
            }
            Route::Bootstrap => {
                if !align.is_power_of_two() || align % mem::size_of::<*mut c_void>() != 0 {
                    return libc::EINVAL;
                }
                *out = self.bootstrap_alloc(size, align.max(BOOTSTRAP_ALIGN));
                0
            }
        }
    }

    /// What the caller may use of `ptr`: the real usable size minus the
    /// footer. `0` for bootstrap blocks, whose size nobody knows.
    ///
    /// # Safety
    ///
    /// `ptr` is null or a live block from one of these hooks
    pub unsafe fn usable_size(&self, ptr: *mut c_void) -> usize {
        if ptr.is_null() || self.bootstrap.owns(ptr) {
            return 0;
        }
        match self.real() {
            Some(table) => (table.usable_size)(ptr).saturating_sub(FOOTER_SIZE),
            None => 0,
        }
    }

    /// `operator new` and `operator new[]`: never asked for zero bytes, never
    /// null. What to do on `None` is up to the runtime binding.
    pub fn operator_new(&self, size: usize, site: usize) -> Option<NonNull<c_void>> {
        hook_trace!("new(size_t), size = {size}");
        // malloc(0) may legitimately return null, which would read as failure
        NonNull::new(self.malloc(size.max(1), site))
    }

    /// [`Self::operator_new()`] with the failure half of the contract: out of
    /// memory calls whatever `thrower` finds, which unwinds through this frame.
    /// Without a thrower there is nobody to catch, so this ends up in
    /// `handle_alloc_error()`.
    ///
    /// # Safety
    ///
    /// A thrower must be a C++ throw function, or otherwise unwind in a way
    /// the caller of the exported symbol can handle
    pub unsafe fn operator_new_or_throw<F>(
        &self,
        size: usize,
        site: usize,
        thrower: F,
    ) -> *mut c_void
    where
        F: FnOnce() -> Option<ThrowFn>,
    {
        match self.operator_new(size, site) {
            Some(ptr) => ptr.as_ptr(),
            None => throw_bad_alloc(size, thrower),
        }
    }
}

#[cold]
unsafe fn throw_bad_alloc<F>(size: usize, thrower: F) -> !
where
    F: FnOnce() -> Option<ThrowFn>,
{
    if let Some(throw) = thrower() {
        throw()
    }
    handle_alloc_error(Layout::from_size_align(size, 1).unwrap_or(Layout::new::<u8>()))
}

/// Lets a Rust program tag its own heap without `LD_PRELOAD`. Rust callers
/// have no return address to offer, their blocks carry call site `0`.
unsafe impl<S, T> GlobalAlloc for Hooks<S, T>
where
    S: SymbolSource,
    T: Tally,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= MALLOC_ALIGN {
            self.malloc(layout.size(), 0).cast()
        } else {
            self.memalign(layout.align(), layout.size(), 0).cast()
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= MALLOC_ALIGN {
            self.calloc(1, layout.size(), 0).cast()
        } else {
            let p = self.alloc(layout);
            if !p.is_null() {
                ptr::write_bytes(p, 0, layout.size());
            }
            p
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _: Layout) {
        self.free(ptr.cast())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= MALLOC_ALIGN && new_size != 0 {
            Hooks::realloc(self, ptr.cast(), new_size, 0).cast()
        } else {
            let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
            let new = self.alloc(new_layout);
            if !new.is_null() {
                ptr::copy_nonoverlapping(ptr, new, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
            new
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ffi::CStr,
        slice,
        sync::atomic::{AtomicPtr, Ordering},
    };

    use super::*;
    use crate::{
        alloc::{
            counters::{LiveCounters, LiveCounts, NoTally},
            footer::BlockFooter,
            resolver::LinkedLibc,
        },
        lazy_lock::LazyLockState,
        util::assert::aligned_to,
    };

    fn hooks() -> Box<Hooks<LinkedLibc, LiveCounters>> {
        Box::new(Hooks::new(LinkedLibc, LiveCounters::new()))
    }

    unsafe fn footer_of(p: *mut c_void) -> BlockFooter {
        footer::read(p, libc::malloc_usable_size).unwrap()
    }

    #[test]
    fn malloc_tags_with_site_and_size() {
        let hooks = hooks();
        let p = hooks.malloc(100, 0x4242);
        assert!(!p.is_null());
        unsafe {
            let usable = libc::malloc_usable_size(p);
            assert!(usable >= 100 + FOOTER_SIZE);
            assert_eq!(
                footer_of(p),
                BlockFooter {
                    ret_addr: 0x4242,
                    alloc_size: 100
                }
            );
            assert_eq!(hooks.tally().snapshot(), LiveCounts { allocs: 1, bytes: 100 });
            hooks.free(p);
        }
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
        assert_eq!(hooks.bootstrap().allocs(), 0);
        assert_eq!(hooks.resolver().state(), LazyLockState::Init);
    }

    #[test]
    fn calloc_zeroes_the_caller_bytes() {
        let hooks = hooks();
        let q = hooks.calloc(10, 4, 1);
        assert!(!q.is_null());
        unsafe {
            assert!(slice::from_raw_parts(q.cast::<u8>(), 40).iter().all(|&b| b == 0));
            assert_eq!(footer_of(q).alloc_size, 40);
            hooks.free(q);
        }
    }

    #[test]
    fn calloc_overflow_is_enomem() {
        let hooks = hooks();
        crate::os::mem::set_errno(0);
        assert!(hooks.calloc(usize::MAX / 2, 3, 0).is_null());
        assert_eq!(crate::os::mem::errno(), libc::ENOMEM);
        assert!(hooks.malloc(usize::MAX - 1, 0).is_null());
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
    }

    #[test]
    fn free_null_is_a_no_op() {
        let hooks = hooks();
        unsafe { hooks.free(ptr::null_mut()) };
        assert_eq!(hooks.resolver().state(), LazyLockState::Uninit);
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
    }

    #[test]
    fn realloc_null_is_malloc() {
        let hooks = hooks();
        unsafe {
            let p = hooks.realloc(ptr::null_mut(), 64, 9);
            assert!(!p.is_null());
            assert_eq!(
                footer_of(p),
                BlockFooter {
                    ret_addr: 9,
                    alloc_size: 64
                }
            );
            assert_eq!(hooks.tally().snapshot(), LiveCounts { allocs: 1, bytes: 64 });
            hooks.free(p);
        }
    }

    #[test]
    fn realloc_up_and_down_keeps_the_prefix() {
        let hooks = hooks();
        unsafe {
            let p = hooks.malloc(32, 1).cast::<u8>();
            for i in 0..32 {
                *p.add(i) = i as u8;
            }
            let p = hooks.realloc(p.cast(), 4096, 2).cast::<u8>();
            assert_eq!(footer_of(p.cast()).alloc_size, 4096);
            assert_eq!(hooks.tally().snapshot(), LiveCounts { allocs: 1, bytes: 4096 });
            let p = hooks.realloc(p.cast(), 32, 3).cast::<u8>();
            assert_eq!(
                footer_of(p.cast()),
                BlockFooter {
                    ret_addr: 3,
                    alloc_size: 32
                }
            );
            assert!((0..32).all(|i| *p.add(i) == i as u8));
            assert_eq!(hooks.tally().snapshot(), LiveCounts { allocs: 1, bytes: 32 });
            hooks.free(p.cast());
        }
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
    }

    #[test]
    fn realloc_to_zero_frees() {
        let hooks = hooks();
        unsafe {
            let p = hooks.malloc(10, 0);
            assert!(hooks.realloc(p, 0, 0).is_null());
        }
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
    }

    #[test]
    fn reallocarray_checks_overflow() {
        let hooks = hooks();
        unsafe {
            let p = hooks.malloc(8, 0);
            assert!(hooks.reallocarray(p, usize::MAX, 2, 0).is_null());
            // the old block survives a failed resize
            let p = hooks.reallocarray(p, 4, 8, 0);
            assert_eq!(footer_of(p).alloc_size, 32);
            hooks.free(p);
        }
    }

    #[test]
    fn aligned_variants_align_and_tag() {
        let hooks = hooks();
        unsafe {
            let a = hooks.memalign(256, 19, 1);
            assert!(aligned_to(a, 256));
            assert_eq!(footer_of(a).alloc_size, 19);

            let b = hooks.aligned_alloc(64, 100, 2);
            assert!(aligned_to(b, 64));
            assert_eq!(footer_of(b).ret_addr, 2);

            let c = hooks.valloc(10, 3);
            assert!(aligned_to(c, page_size()));
            assert_eq!(footer_of(c).alloc_size, 10);

            let mut d = ptr::null_mut();
            assert_eq!(hooks.posix_memalign(&mut d, 1024, 19, 4), 0);
            assert!(aligned_to(d, 1024));
            assert_eq!(
                footer_of(d),
                BlockFooter {
                    ret_addr: 4,
                    alloc_size: 19
                }
            );

            assert_eq!(hooks.tally().snapshot(), LiveCounts { allocs: 4, bytes: 148 });
            for p in [a, b, c, d] {
                hooks.free(p);
            }
        }
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
    }

    #[test]
    fn posix_memalign_passes_status_through() {
        let hooks = hooks();
        let mut out = 0x1 as *mut c_void;
        unsafe {
            assert_eq!(hooks.posix_memalign(&mut out, 3, 8, 0), libc::EINVAL);
        }
        assert_eq!(out, 0x1 as *mut c_void);
        assert!(hooks.aligned_alloc(3, 8, 0).is_null());
        assert_eq!(hooks.tally().snapshot(), LiveCounts::default());
    }

    #[test]
    fn usable_size_hides_the_footer() {
        let hooks = hooks();
        unsafe {
            let p = hooks.malloc(50, 0);
            let usable = hooks.usable_size(p);
            assert!(usable >= 50);
            assert_eq!(usable, libc::malloc_usable_size(p) - FOOTER_SIZE);
            // writing all of it leaves the footer intact
            ptr::write_bytes(p.cast::<u8>(), 0xab, usable);
            assert_eq!(footer_of(p).alloc_size, 50);
            hooks.free(p);
            assert_eq!(hooks.usable_size(ptr::null_mut()), 0);
        }
    }

    #[test]
    fn operator_new_never_asks_for_zero() {
        let hooks = hooks();
        let p = hooks.operator_new(0, 7).unwrap();
        unsafe {
            assert_eq!(footer_of(p.as_ptr()).alloc_size, 1);
            hooks.free(p.as_ptr());
        }
    }

    struct BadAlloc;

    extern "C-unwind" fn raise_bad_alloc() -> ! {
        std::panic::panic_any(BadAlloc)
    }

    static THROWING: Hooks<LinkedLibc, LiveCounters> =
        Hooks::new(LinkedLibc, LiveCounters::new());

    /// Same shape as the exported `operator new`
    extern "C-unwind" fn new_through_ffi(size: usize) -> *mut c_void {
        unsafe { THROWING.operator_new_or_throw(size, 0, || Some(raise_bad_alloc as ThrowFn)) }
    }

    #[test]
    fn operator_new_failure_unwinds_to_the_caller() {
        let caught = std::panic::catch_unwind(|| new_through_ffi(usize::MAX / 2));
        let payload = caught.expect_err("allocation should have thrown");
        assert!(payload.is::<BadAlloc>());
        assert_eq!(THROWING.tally().snapshot(), LiveCounts::default());

        let hooks = hooks();

        // success never looks for a thrower
        let p = unsafe { hooks.operator_new_or_throw(8, 3, || panic!("looked up a thrower")) };
        unsafe {
            assert_eq!(footer_of(p), BlockFooter { ret_addr: 3, alloc_size: 8 });
            hooks.free(p);
        }
    }

    #[test]
    fn disabled_tally_skips_the_footer_read() {
        let hooks = Box::new(Hooks::new(LinkedLibc, NoTally));
        unsafe {
            let p = hooks.malloc(16, 5);
            assert_eq!(footer_of(p).ret_addr, 5);
            hooks.free(p);
        }
    }

    /// Allocates from inside its own lookup, the way glibc's `dlsym()` does
    struct Reentrant;

    static REENTRANT: Hooks<Reentrant, LiveCounters> = Hooks::new(Reentrant, LiveCounters::new());
    static DURING_LOOKUP: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
    static ZEROED_DURING_LOOKUP: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

    unsafe impl SymbolSource for Reentrant {
        fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
            if name == c"malloc" {
                let p = REENTRANT.malloc(24, 0xb007);
                unsafe { ptr::write_bytes(p.cast::<u8>(), 0x5a, 24) };
                DURING_LOOKUP.store(p, Ordering::SeqCst);
                ZEROED_DURING_LOOKUP.store(REENTRANT.calloc(4, 4, 0), Ordering::SeqCst);
            }
            LinkedLibc.lookup(name)
        }
    }

    /// Grows a bootstrap block from inside its own lookup
    struct GrowsDuringLookup;

    static GROWING: Hooks<GrowsDuringLookup, LiveCounters> =
        Hooks::new(GrowsDuringLookup, LiveCounters::new());
    static GROWN_DURING_LOOKUP: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

    unsafe impl SymbolSource for GrowsDuringLookup {
        fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
            if name == c"malloc" {
                let p = GROWING.malloc(8, 0);
                unsafe {
                    ptr::copy_nonoverlapping(b"bootstr!".as_ptr(), p.cast::<u8>(), 8);
                    GROWN_DURING_LOOKUP.store(GROWING.realloc(p, 64, 0), Ordering::SeqCst);
                }
            }
            LinkedLibc.lookup(name)
        }
    }

    #[test]
    fn growing_a_bootstrap_block_during_resolution_stays_in_the_arena() {
        let p = GROWING.malloc(4, 1);
        assert!(!GROWING.bootstrap().owns(p));

        let grown = GROWN_DURING_LOOKUP.load(Ordering::SeqCst);
        assert!(GROWING.bootstrap().owns(grown));
        assert!(aligned_to(grown, BOOTSTRAP_ALIGN));
        unsafe {
            assert_eq!(slice::from_raw_parts(grown.cast::<u8>(), 8), b"bootstr!");
        }
        // the old 8 bytes, then the 64 new ones after the aligned cursor
        assert_eq!(GROWING.bootstrap().allocs(), 2);
        assert_eq!(GROWING.bootstrap().used(), 16 + 64);
        assert_eq!(GROWING.tally().snapshot(), LiveCounts { allocs: 1, bytes: 4 });
        unsafe { GROWING.free(p) };
    }

    #[test]
    fn allocation_during_resolution_uses_the_bootstrap_arena() {
        let p = REENTRANT.malloc(8, 1);
        assert!(!p.is_null());
        assert_eq!(REENTRANT.resolver().state(), LazyLockState::Init);

        // the outer call went to the real allocator
        assert!(!REENTRANT.bootstrap().owns(p));
        unsafe { assert_eq!(footer_of(p).alloc_size, 8) };

        // the nested ones did not, and were not counted
        let early = DURING_LOOKUP.load(Ordering::SeqCst);
        let zeroed = ZEROED_DURING_LOOKUP.load(Ordering::SeqCst);
        assert!(REENTRANT.bootstrap().owns(early));
        assert!(REENTRANT.bootstrap().owns(zeroed));
        assert!(aligned_to(early, BOOTSTRAP_ALIGN));
        assert_eq!(REENTRANT.bootstrap().allocs(), 2);
        assert_eq!(REENTRANT.tally().snapshot(), LiveCounts { allocs: 1, bytes: 8 });
        unsafe {
            assert!(slice::from_raw_parts(zeroed.cast::<u8>(), 16).iter().all(|&b| b == 0));
        }

        // freeing bootstrap blocks changes nothing
        let used = REENTRANT.bootstrap().used();
        unsafe {
            REENTRANT.free(early);
            REENTRANT.free(zeroed);
        }
        assert_eq!(REENTRANT.bootstrap().used(), used);
        assert_eq!(REENTRANT.resolver().state(), LazyLockState::Init);

        // growing one moves it to the real allocator, contents and all
        let moved = unsafe { REENTRANT.realloc(early, 64, 2) };
        assert!(!REENTRANT.bootstrap().owns(moved));
        unsafe {
            assert!(slice::from_raw_parts(moved.cast::<u8>(), 24).iter().all(|&b| b == 0x5a));
            assert_eq!(
                footer_of(moved),
                BlockFooter {
                    ret_addr: 2,
                    alloc_size: 64
                }
            );
            assert_eq!(REENTRANT.usable_size(early), 0);
            REENTRANT.free(moved);
            REENTRANT.free(p);
        }
        assert_eq!(REENTRANT.tally().snapshot(), LiveCounts::default());
    }
}
