//! An allocator interposer. Every heap block handed out through `malloc()`,
//! `operator new` and friends carries a small footer recording who allocated
//! it and how many bytes they asked for, so a heap dump can be attributed to
//! call sites after the fact.
//!
//! ```sh
//! cargo build --release --features interpose
//! LD_PRELOAD=target/release/libhookalloc.so ./program
//! ```
//!
//! Without `interpose` nothing is exported, and the hooks can be used from
//! Rust directly, e.g. as a `#[global_allocator]`:
//!
//! ```no_run
//! use hookalloc::alloc::{counters::NoTally, hooks::Hooks, resolver::LinkedLibc};
//!
//! #[global_allocator]
//! static GLOBAL: Hooks<LinkedLibc, NoTally> = Hooks::new(LinkedLibc, NoTally);
//!
//! fn main() {}
//! ```

pub mod alloc;
pub mod arch;
pub mod config;
pub mod error;
#[cfg(all(feature = "interpose", not(test)))]
pub mod externc;
pub mod lazy_lock;
pub mod os;
pub mod util;

// `operator new` reports failure by throwing through the exported frames
#[cfg(all(feature = "interpose", panic = "abort"))]
compile_error!("`interpose` needs `panic = \"unwind\"` for std::bad_alloc to reach its catcher");
