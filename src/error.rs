//! The two ways the interposer can fail that are not the real allocator's
//! business. Both are fatal at the hook boundary: an allocator that cannot
//! account for its memory has no safe degraded mode.

use core::fmt;
use std::ffi::CStr;

use crate::eputln;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookError {
    /// A required entry point could not be found in the next object in link
    /// order
    Unresolved { symbol: &'static CStr },
    /// The pre-resolution arena ran out
    BootstrapExhausted { requested: usize, remaining: usize },
}

pub type Result<T> = core::result::Result<T, HookError>;

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved { symbol } => write!(
                f,
                "error in `dlsym`: could not resolve `{}`",
                symbol.to_str().unwrap_or("<non-utf8 symbol>")
            ),
            Self::BootstrapExhausted {
                requested,
                remaining,
            } => write!(
                f,
                "too much memory requested during initialisation ({requested} bytes, \
                 {remaining} left) - increase BOOTSTRAP_CAPACITY"
            ),
        }
    }
}

/// Report `err` on stderr and terminate immediately. `_exit()` rather than
/// `exit()`: atexit handlers would run on top of a broken allocator.
#[cold]
pub fn fatal(err: HookError) -> ! {
    eputln!("{}{}", crate::config::TRACE_PREFIX, err);
    if let HookError::Unresolved { .. } = err {
        // SAFETY: `dlerror()` returns null or a NUL-terminated thread local
        // string that stays valid until the next dl* call on this thread
        let reason = unsafe { libc::dlerror() };
        if !reason.is_null() {
            // SAFETY: checked non-null above, NUL-terminated per `dlerror()`
            let reason = unsafe { CStr::from_ptr(reason) };
            eputln!(
                "{}{}",
                crate::config::TRACE_PREFIX,
                reason.to_str().unwrap_or("<non-utf8 reason>")
            );
        }
    }
    // SAFETY: always safe to call
    unsafe { libc::_exit(1) }
}
