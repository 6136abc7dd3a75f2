use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::util::hint::cold;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LazyLockState {
    /// Signifies this lock is uninitialized
    Uninit,
    /// Signifies this lock is initialized
    Init,
    /// Signifies this lock is mid initialization. Anyone who sees this,
    /// including the initializer itself if it re-enters, has to make do
    /// without the value.
    Initializing,
}

impl LazyLockState {
    const fn from_u8(state: u8) -> Self {
        match state {
            0 => Self::Uninit,
            1 => Self::Init,
            _ => Self::Initializing,
        }
    }
}

/// A write-once cell that lets you poll its initialization state (including
/// mid-init) and never blocks. Unlike `std::sync::OnceLock`, a caller that
/// finds initialization in progress gets told so instead of waiting, which is
/// the only sane answer when the initializer might call back into us on the
/// same thread.
pub struct LazyLock<T> {
    cell: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
}

// SAFETY: `cell` is written exactly once, by the single caller that moved
// `state` from `Uninit` to `Initializing`, and only read after `state` is
// observed as `Init` with acquire ordering.
unsafe impl<T> Sync for LazyLock<T> where T: Send + Sync {}

impl<T> LazyLock<T> {
    pub const fn new() -> Self {
        Self {
            cell: UnsafeCell::new(MaybeUninit::uninit()),
            state: AtomicU8::new(LazyLockState::Uninit as u8),
        }
    }

    pub fn state(lock: &Self) -> LazyLockState {
        LazyLockState::from_u8(lock.state.load(Ordering::Acquire))
    }

    /// The value, if initialization has completed
    pub fn get(&self) -> Option<&T> {
        if LazyLock::state(self) == LazyLockState::Init {
            // SAFETY: `Init` is only published after the write to `cell`
            Some(unsafe { self.assume_init() })
        } else {
            None
        }
    }

    unsafe fn assume_init(&self) -> &T {
        // This borrow is not needless
        #[allow(clippy::needless_borrow)]
        (&*self.cell.get()).assume_init_ref()
    }

    /// Get the value, running `init` if nobody has started yet.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` once initialized (possibly by this call)
    /// - `Ok(None)` if initialization is in flight elsewhere, or further up
    ///   this thread's stack
    /// - `Err(e)` if this call ran `init` and it failed. The lock goes back to
    ///   `Uninit`.
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<Option<&T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get() {
            return Ok(Some(value));
        }
        let claimed = self.state.compare_exchange(
            LazyLockState::Uninit as u8,
            LazyLockState::Initializing as u8,
            Ordering::Acquire,
            Ordering::Acquire,
        );
        if claimed.is_err() {
            // Either somebody else is initializing or they finished between
            // our two loads.
            return Ok(self.get());
        }
        cold(|| match init() {
            Ok(value) => {
                // SAFETY: we are the only writer, nobody reads until `Init`
                unsafe { (*self.cell.get()).write(value) };
                self.state.store(LazyLockState::Init as u8, Ordering::Release);
                // SAFETY: just written
                Ok(Some(unsafe { self.assume_init() }))
            }
            Err(e) => {
                self.state.store(LazyLockState::Uninit as u8, Ordering::Release);
                Err(e)
            }
        })
    }
}

impl<T> Default for LazyLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LazyLock<T> {
    fn drop(&mut self) {
        if LazyLock::state(self) == LazyLockState::Init {
            // SAFETY: initialized, and `&mut self` means no readers are left
            unsafe { self.cell.get_mut().assume_init_drop() }
        }
    }
}
