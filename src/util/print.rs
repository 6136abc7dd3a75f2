//! Output that never touches the heap. Anything reachable from an allocation
//! hook must print through here, `std::io` and friends may allocate and would
//! recurse straight back into the hook.

use core::fmt;

use libc::c_int;

/// A `fmt::Write` straight onto a file descriptor
pub struct FdWriter(c_int);

impl FdWriter {
    pub const fn stdout() -> Self {
        Self(libc::STDOUT_FILENO)
    }

    pub const fn stderr() -> Self {
        Self(libc::STDERR_FILENO)
    }
}

impl fmt::Write for FdWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            // SAFETY: `bytes` is a live slice of exactly `bytes.len()` bytes
            let n = unsafe { libc::write(self.0, bytes.as_ptr().cast(), bytes.len()) };
            if n < 0 {
                if crate::os::mem::errno() == libc::EINTR {
                    continue;
                }
                return Err(fmt::Error);
            }
            bytes = &bytes[n as usize..];
        }
        Ok(())
    }
}

/// `print!()` without the allocator
#[macro_export]
macro_rules! put {
    ($($arg:tt)*) => {{
        let _ = ::core::fmt::Write::write_fmt(
            &mut $crate::util::print::FdWriter::stdout(),
            format_args!($($arg)*),
        );
    }};
}

/// `println!()` without the allocator
#[macro_export]
macro_rules! putln {
    ($($arg:tt)*) => {{
        $crate::put!($($arg)*);
        $crate::put!("\n");
    }};
}

/// `eprintln!()` without the allocator
#[macro_export]
macro_rules! eputln {
    ($($arg:tt)*) => {{
        let mut w = $crate::util::print::FdWriter::stderr();
        let _ = ::core::fmt::Write::write_fmt(&mut w, format_args!($($arg)*));
        let _ = ::core::fmt::Write::write_str(&mut w, "\n");
    }};
}

/// Hook tracing, only with the `trace` feature
#[cfg(feature = "trace")]
#[macro_export]
macro_rules! hook_trace {
    ($($arg:tt)*) => {{
        $crate::put!("{}", $crate::config::TRACE_PREFIX);
        $crate::putln!($($arg)*);
    }};
}

/// Hook tracing, only with the `trace` feature
#[cfg(not(feature = "trace"))]
#[macro_export]
macro_rules! hook_trace {
    ($($arg:tt)*) => {{
        if false {
            let _ = format_args!($($arg)*);
        }
    }};
}
