//! Finding the allocator we are standing in front of.
//!
//! Resolution is done once, lazily, from inside the first allocation. The
//! lookup itself may allocate (glibc's `dlsym()` wants a `calloc()` for its
//! error state), so while it runs everyone, including the resolving thread
//! itself, is told to use the bootstrap arena instead.

use std::{ffi::CStr, mem, ptr::NonNull};

use libc::{c_int, c_void};

use super::footer::UsableSizeFn;
use crate::{
    config::MALLOC_CHECK_ACTION,
    error::{HookError, Result},
    lazy_lock::{LazyLock, LazyLockState},
    os::mem::set_malloc_check_action,
};

pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
pub type MemalignFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type VallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> c_int;

// not bound by the libc crate
extern "C" {
    fn valloc(size: usize) -> *mut c_void;
}

/// Somewhere to look allocator entry points up by name.
///
/// # Safety
///
/// A symbol returned for one of the names in [`AllocatorTable`] must be a
/// function with the C signature of the libc function of that name, and all of
/// them must belong to the same allocator.
pub unsafe trait SymbolSource: Sync {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>>;
}

/// The next object after us in the dynamic link order, i.e. whichever
/// allocator we are interposing. `dlsym(RTLD_NEXT, ..)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NextInLinkOrder;

// SAFETY: the next definitions in link order are the real libc-compatible
// allocator functions
unsafe impl SymbolSource for NextInLinkOrder {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
        // SAFETY: `name` is NUL-terminated
        NonNull::new(unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) })
    }
}

/// The libc allocator this image was linked against, without any dynamic
/// lookup. For embedding the hooks in a program that does not export them
/// (e.g. as a `#[global_allocator]`), and for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkedLibc;

// SAFETY: these are libc's own functions, with libc's signatures
unsafe impl SymbolSource for LinkedLibc {
    fn lookup(&self, name: &CStr) -> Option<NonNull<c_void>> {
        let f = match name.to_bytes() {
            b"malloc" => libc::malloc as *mut c_void,
            b"calloc" => libc::calloc as *mut c_void,
            b"free" => libc::free as *mut c_void,
            b"realloc" => libc::realloc as *mut c_void,
            b"memalign" => libc::memalign as *mut c_void,
            b"valloc" => valloc as *mut c_void,
            b"posix_memalign" => libc::posix_memalign as *mut c_void,
            b"malloc_usable_size" => libc::malloc_usable_size as *mut c_void,
            _ => return None,
        };
        NonNull::new(f)
    }
}

/// The real allocator's entry points. Written once, read-only afterwards.
#[derive(Clone, Copy, Debug)]
pub struct AllocatorTable {
    pub malloc: MallocFn,
    pub calloc: CallocFn,
    pub free: FreeFn,
    pub realloc: ReallocFn,
    pub memalign: MemalignFn,
    pub valloc: VallocFn,
    pub posix_memalign: PosixMemalignFn,
    pub usable_size: UsableSizeFn,
}

macro_rules! resolve_table {
    ($source:expr; $($field:ident = $symbol:literal),* $(,)?) => {
        AllocatorTable {
            $($field: {
                let symbol: &'static CStr = $symbol;
                let f = $source
                    .lookup(symbol)
                    .ok_or(HookError::Unresolved { symbol })?;
                // SAFETY: `SymbolSource` guarantees the signature
                unsafe { mem::transmute::<*mut c_void, _>(f.as_ptr()) }
            },)*
        }
    };
}

impl AllocatorTable {
    /// Look up every entry point in `source`. Fails on the first missing one.
    pub fn resolve<S: SymbolSource>(source: &S) -> Result<Self> {
        Ok(resolve_table! { source;
            malloc = c"malloc",
            calloc = c"calloc",
            free = c"free",
            realloc = c"realloc",
            memalign = c"memalign",
            valloc = c"valloc",
            posix_memalign = c"posix_memalign",
            usable_size = c"malloc_usable_size",
        })
    }
}

/// Where an allocation should be served from right now
#[derive(Clone, Copy, Debug)]
pub enum Route<'a> {
    /// The real allocator
    Real(&'a AllocatorTable),
    /// Resolution is in flight (on this thread or another), use the bootstrap
    /// arena
    Bootstrap,
}

pub struct Resolver<S> {
    source: S,
    table: LazyLock<AllocatorTable>,
}

impl<S: SymbolSource> Resolver<S> {
    pub const fn new(source: S) -> Self {
        Self {
            source,
            table: LazyLock::new(),
        }
    }

    /// Make sure the table is populated and say where to allocate from. The
    /// first caller does the lookup, anyone arriving while it runs gets
    /// [`Route::Bootstrap`].
    pub fn ensure_resolved(&self) -> Result<Route<'_>> {
        if let Some(table) = self.table.get() {
            return Ok(Route::Real(table));
        }
        let table = self.table.get_or_try_init(|| {
            crate::hook_trace!("resolving allocator entry points");
            if cfg!(feature = "check-action") {
                set_malloc_check_action(MALLOC_CHECK_ACTION);
            }
            AllocatorTable::resolve(&self.source)
        })?;
        Ok(table.map_or(Route::Bootstrap, Route::Real))
    }

    /// The table, if resolution has completed
    pub fn resolved(&self) -> Option<&AllocatorTable> {
        self.table.get()
    }

    pub fn state(&self) -> LazyLockState {
        LazyLock::state(&self.table)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
