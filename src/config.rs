//! Build-time knobs. There is no run-time configuration: by the time anything
//! could read an environment variable the allocator is already in use.
//!
//! Cargo features:
//!
//! - `interpose`: export the allocator entry points from the built library
//! - `counters`: keep live allocation and byte counts
//! - `trace`: print a line for the interesting hook events
//! - `check-action`: set glibc's `M_CHECK_ACTION` to
//!   [`MALLOC_CHECK_ACTION`] when the allocator is first resolved

/// Bytes available to serve allocations while the real allocator is being
/// resolved. `dlsym()` on glibc needs well under 1 KiB here.
pub const BOOTSTRAP_CAPACITY: usize = 16 * 1024;

/// Alignment of every plain bootstrap allocation, matching `max_align_t`
pub const BOOTSTRAP_ALIGN: usize = 16;

/// `M_CHECK_ACTION` under the `check-action` feature: report heap corruption
/// glibc detects and keep going
pub const MALLOC_CHECK_ACTION: libc::c_int = 1;

/// Prefix of every `trace` line
pub const TRACE_PREFIX: &str = "#hookalloc: ";
