use std::sync::LazyLock;

use libc::c_int;

static PAGE_SIZE: LazyLock<usize> = LazyLock::new(page_size::get);

// glibc <malloc.h>
const M_CHECK_ACTION: c_int = -5;

extern "C" {
    fn mallopt(param: c_int, value: c_int) -> c_int;
}

/// The system page size, what `valloc()` aligns to
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Current thread's `errno`
pub fn errno() -> c_int {
    // SAFETY: `__errno_location()` always returns a valid pointer to this
    // thread's errno
    unsafe { *libc::__errno_location() }
}

/// Set this thread's `errno`
pub fn set_errno(code: c_int) {
    // SAFETY: as above
    unsafe { *libc::__errno_location() = code }
}

/// What glibc does when its own checks catch heap corruption, see
/// `mallopt(3)`. `false` if the allocator refused.
pub fn set_malloc_check_action(action: c_int) -> bool {
    // SAFETY: plain C call, takes no pointers
    unsafe { mallopt(M_CHECK_ACTION, action) == 1 }
}
