//! Synchronization primitives for the ramdisk core.
//!
//! The core is handed a small, fixed set of lock shapes by its host rather than
//! rolling its own: short, exclusive critical sections for scalar counters and
//! the block bitmap ([`ShortLock`]); a reader/writer lock for per-inode state,
//! where many readers may run concurrently but a mutation needs exclusivity
//! ([`RwCell`]); and a lock-free reference count for tracking outstanding opens
//! and in-flight structural reservations ([`OpenCount`]).
//!
//! All three are built on [`spin`], so `acquire`/`release` never parks a
//! thread on an OS primitive -- callers are expected to hold these locks only
//! for O(1) or O(block size) work, per the core's locking discipline.

use core::sync::atomic::{AtomicI64, Ordering};

use spin::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A short, exclusive critical section.
///
/// Used for the superblock's free-count fields and the block bitmap: both are
/// touched only briefly (a counter decrement, a bit scan) and never while
/// holding any other lock.
pub struct ShortLock<T> {
    inner: Mutex<T>,
}

impl<T> ShortLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, spinning until it is free.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

/// A reader/writer lock guarding one inode's fields and, by convention, the
/// data and indirect blocks it owns.
///
/// Readers run concurrently (lookups, reads); a writer excludes everyone else
/// (creat, mkdir, unlink, write, extend). [`RwCell::try_write`] is the
/// non-blocking exclusive acquire that unlink and write use to avoid
/// deadlocking against a reader that is itself waiting to upgrade.
pub struct RwCell<T> {
    inner: RwLock<T>,
}

impl<T> RwCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Acquires a shared (read) lock, blocking until no writer holds it.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Acquires the exclusive (write) lock, blocking until all readers and
    /// any writer release it.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Attempts to acquire the exclusive lock without blocking. Returns
    /// `None` if any reader or writer currently holds it.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.inner.try_write()
    }
}

/// An atomic reference count of outstanding opens and in-flight structural
/// reservations on one inode.
///
/// A holder of a shared lock that needs to upgrade to exclusive (creation
/// linking a new child into its parent, unlink upgrading the parent's lock)
/// increments this before dropping the shared lock, so that a concurrent
/// unlink of the same inode sees a nonzero count and backs off instead of
/// reclaiming it out from under the handover. Unlink itself refuses
/// whenever the count is nonzero.
pub struct OpenCount {
    count: AtomicI64,
}

impl OpenCount {
    pub const fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
        }
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn get(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}

impl Default for OpenCount {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_write_refuses_while_read_held() {
        let cell = RwCell::new(0u32);
        let _guard = cell.read();
        assert!(cell.try_write().is_none());
    }

    #[test]
    fn open_count_tracks_concurrent_increments() {
        let count = Arc::new(OpenCount::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let count = Arc::clone(&count);
                thread::spawn(move || {
                    count.increment();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(count.get(), 8);
    }
}
