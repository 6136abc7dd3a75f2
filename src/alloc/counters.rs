use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam::utils::CachePadded;

/// What the hooks report every allocation and free to. The interposed build
/// picks an implementation at compile time (the `counters` feature), so a
/// disabled tally costs nothing, not even the footer read in `free()`.
pub trait Tally: Sync {
    /// Whether `free()` should bother reading the footer
    const ENABLED: bool;

    fn on_alloc(&self, size: usize);

    fn on_free(&self, size: usize);

    /// A successful `realloc()` from `old` to `new` bytes
    fn on_resize(&self, old: usize, new: usize);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoTally;

impl Tally for NoTally {
    const ENABLED: bool = false;

    #[inline(always)]
    fn on_alloc(&self, _: usize) {}

    #[inline(always)]
    fn on_free(&self, _: usize) {}

    #[inline(always)]
    fn on_resize(&self, _: usize, _: usize) {}
}

/// Snapshot of [`LiveCounters`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LiveCounts {
    /// Blocks currently allocated
    pub allocs: i64,
    /// Bytes currently allocated, as requested by the callers
    pub bytes: i64,
}

/// Live allocation and byte counts. Signed: a block allocated before the
/// counters existed can be freed after, and that should show up rather than
/// wrap around.
#[derive(Debug, Default)]
pub struct LiveCounters {
    allocs: CachePadded<AtomicI64>,
    bytes: CachePadded<AtomicI64>,
}

impl LiveCounters {
    pub const fn new() -> Self {
        Self {
            allocs: CachePadded::new(AtomicI64::new(0)),
            bytes: CachePadded::new(AtomicI64::new(0)),
        }
    }

    pub fn snapshot(&self) -> LiveCounts {
        LiveCounts {
            allocs: self.allocs.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl Tally for LiveCounters {
    const ENABLED: bool = true;

    fn on_alloc(&self, size: usize) {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as i64, Ordering::Relaxed);
    }

    fn on_free(&self, size: usize) {
        self.allocs.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(size as i64, Ordering::Relaxed);
    }

    fn on_resize(&self, old: usize, new: usize) {
        self.bytes.fetch_add(new as i64 - old as i64, Ordering::Relaxed);
    }
}
