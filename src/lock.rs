//! Reentrant single-writer/multi-reader lock for shared data sets.
//!
//! [`DataSetLock`] owns the protected resource and layers three concerns on
//! top of the [`StampedLock`](crate::stamped::StampedLock) primitive:
//!
//! - **Shared read counting**: any number of logical `read_lock` calls share
//!   one physical read acquisition. Only the 0→N transition touches the
//!   primitive; the N→0 transition releases it with the original stamp.
//! - **Write reentrancy**: the thread inside the write section may call
//!   `write_lock` again without blocking. Ownership lives in an atomic
//!   thread-identity field, so the "am I already the holder" check cannot
//!   race with another thread's acquisition.
//! - **Notification muting**: entering the outermost write section captures
//!   the resource's notification flag and disables it; the matching
//!   outermost unlock restores the captured value exactly once.
//!
//! Guard combinators ([`read_lock_guard`](DataSetLock::read_lock_guard),
//! [`write_lock_guard`](DataSetLock::write_lock_guard),
//! [`read_lock_guard_optimistic`](DataSetLock::read_lock_guard_optimistic))
//! release on every exit path, including a panic propagating out of the
//! supplied closure. RAII guards ([`read`](DataSetLock::read),
//! [`write`](DataSetLock::write)) cover the cases where a closure is
//! inconvenient.
//!
//! # Example
//!
//! ```ignore
//! let lock = DataSetLock::new(series);
//!
//! // Batch mutation: listeners stay quiet until the section ends.
//! lock.write_lock_guard(|s| {
//!     s.push(1.0);
//!     s.push(2.0);
//! });
//!
//! // Hot-path read: lock-free unless a writer intervenes.
//! let len = lock.read_lock_guard_optimistic(|s| s.len());
//! ```

use crate::notify::{AutoNotify, MuteGuard};
use crate::stamped::{Stamp, StampedLock};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Error returned when an unlock call has no matching outstanding lock.
///
/// These are programming errors in the caller's lock/unlock pairing. They
/// are surfaced immediately and never retried or swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStateError {
    /// `read_unlock` was called with no outstanding read acquisition.
    UnmatchedReadUnlock,
    /// `write_unlock` was called by a thread that does not hold the write
    /// section (including when no write section is held at all).
    UnmatchedWriteUnlock,
}

impl std::fmt::Display for LockStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmatchedReadUnlock => write!(f, "read unlock without matching read lock"),
            Self::UnmatchedWriteUnlock => {
                write!(f, "write unlock without matching write lock on this thread")
            }
        }
    }
}

impl std::error::Error for LockStateError {}

/// Nonzero identity for the current thread, assigned on first use.
///
/// `std::thread::ThreadId` exposes no stable integer, so ownership is
/// tracked through a process-unique counter instead. Zero is reserved for
/// "no owner" in the atomic ownership field.
fn current_thread_id() -> u64 {
    static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

/// A reentrant data-set lock: single writer, many readers, optimistic reads,
/// and notification muting across the outermost write section.
///
/// The lock owns the resource and hands out `&D` on every path; mutation
/// goes through the resource's own interior mutability, with the lock
/// supplying the exclusion discipline. Readers therefore need `D: Sync` to
/// share the lock across threads, and optimistic readers may observe the
/// resource mid-mutation (see
/// [`read_lock_guard_optimistic`](Self::read_lock_guard_optimistic)).
///
/// # Notification contract
///
/// While any write acquisition is outstanding, the resource's notification
/// flag belongs to the lock: it is disabled at the outermost entry and the
/// previously captured value is restored at the outermost exit, regardless
/// of what the write section set it to in between.
#[derive(Debug)]
pub struct DataSetLock<D> {
    stamped: StampedLock,
    /// Outstanding logical read acquisitions; one physical stamp serves all.
    readers: AtomicU32,
    /// Physical read stamp; meaningful only while `readers > 0`.
    read_stamp: AtomicU64,
    /// Nested write acquisitions from the owning thread.
    writers: AtomicU32,
    /// Identity of the thread inside the write section; 0 when none.
    writer_thread: AtomicU64,
    /// Physical write stamp; meaningful only while `writers > 0`.
    write_stamp: AtomicU64,
    /// Notification flag captured at the outermost write entry.
    saved_notify: AtomicBool,
    data: D,
}

impl<D> DataSetLock<D> {
    /// Creates a lock owning `data`.
    #[must_use]
    pub fn new(data: D) -> Self {
        Self {
            stamped: StampedLock::new(),
            readers: AtomicU32::new(0),
            read_stamp: AtomicU64::new(0),
            writers: AtomicU32::new(0),
            writer_thread: AtomicU64::new(0),
            write_stamp: AtomicU64::new(0),
            saved_notify: AtomicBool::new(false),
            data,
        }
    }

    /// Returns a mutable reference to the protected data.
    ///
    /// Exclusive ownership of the lock makes synchronization unnecessary.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// Consumes the lock, returning the protected data.
    #[must_use]
    pub fn into_inner(self) -> D {
        self.data
    }

    /// Number of outstanding logical read acquisitions.
    #[must_use]
    pub fn readers(&self) -> u32 {
        self.readers.load(Ordering::Acquire)
    }

    /// Current write-section nesting depth.
    #[must_use]
    pub fn write_nesting(&self) -> u32 {
        self.writers.load(Ordering::Acquire)
    }

    /// Best-effort query of whether any thread holds the write section.
    #[must_use]
    pub fn is_write_held(&self) -> bool {
        self.stamped.is_write_held()
    }

    /// Acquires a logical read lock and returns the protected data.
    ///
    /// The first acquisition of a 0→N chain enters the physical read section
    /// and publishes its stamp; every further call only increments the
    /// logical count, so a chain blocks the primitive at most once. Each
    /// call must be balanced by exactly one [`read_unlock`](Self::read_unlock).
    pub fn read_lock(&self) -> &D {
        if self.readers.fetch_add(1, Ordering::AcqRel) == 0 {
            let stamp = self.stamped.acquire_read();
            self.read_stamp.store(stamp.raw(), Ordering::Release);
        }
        &self.data
    }

    /// Releases one logical read lock.
    ///
    /// The last release of a chain leaves the physical read section using
    /// the stamp published by the first acquisition. Fails if no read lock
    /// is outstanding.
    pub fn read_unlock(&self) -> Result<&D, LockStateError> {
        let mut count = self.readers.load(Ordering::Acquire);
        loop {
            if count == 0 {
                tracing::error!("read_unlock without matching read_lock");
                return Err(LockStateError::UnmatchedReadUnlock);
            }
            match self.readers.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => count = actual,
            }
        }
        if count == 1 {
            // Last one out: release with the stamp the first one stored.
            let stamp = Stamp::from_raw(self.read_stamp.load(Ordering::Acquire));
            self.stamped.release_read(stamp);
        }
        Ok(&self.data)
    }

    /// Runs `work` under a fresh physical read acquisition.
    ///
    /// Independent of the manual [`read_lock`](Self::read_lock) bookkeeping:
    /// the acquisition taken here is released when `work` returns, on every
    /// exit path, including a panic propagating out of `work`.
    pub fn read_lock_guard<R>(&self, work: impl FnOnce(&D) -> R) -> R {
        let stamp = self.stamped.acquire_read();
        let _release = ReadStampRelease {
            stamped: &self.stamped,
            stamp,
        };
        work(&self.data)
    }

    /// Runs `work` optimistically, without holding any lock.
    ///
    /// If a writer started or completed while `work` ran, the stale result
    /// is discarded and `work` runs again under
    /// [`read_lock_guard`](Self::read_lock_guard). `work` may therefore
    /// execute twice, and its first attempt may observe the resource
    /// mid-mutation: it must be side-effect-free on failure and must not
    /// rely on a consistent view until the call returns.
    pub fn read_lock_guard_optimistic<R>(&self, work: impl Fn(&D) -> R) -> R {
        let stamp = self.stamped.try_optimistic_read();
        let result = work(&self.data);
        if self.stamped.validate(stamp) {
            return result;
        }
        self.read_lock_guard(&work)
    }

    /// Acquires a logical read lock held for the guard's lifetime.
    ///
    /// Shares the reentrancy bookkeeping with
    /// [`read_lock`](Self::read_lock); dropping the guard is the matching
    /// unlock.
    #[must_use = "guard releases the read lock when dropped"]
    pub fn read(&self) -> ReadGuard<'_, D> {
        self.read_lock();
        ReadGuard { lock: self }
    }
}

impl<D: AutoNotify> DataSetLock<D> {
    /// Acquires the write section, reentrantly for the owning thread.
    ///
    /// The outermost acquisition blocks until no readers and no other writer
    /// are active, then captures the resource's notification flag and
    /// disables it; nested acquisitions from the same thread only increment
    /// the nesting count. Notifications stay muted until the matching
    /// outermost [`write_unlock`](Self::write_unlock) restores the captured
    /// value.
    ///
    /// A thread holding read locks that calls `write_lock` deadlocks
    /// against itself; upgrade is not supported.
    pub fn write_lock(&self) -> &D {
        let me = current_thread_id();
        if self.writer_thread.load(Ordering::Acquire) == me {
            // Only this thread can have published `me`, and only this thread
            // clears it, so the ownership check cannot race.
            self.writers.fetch_add(1, Ordering::Relaxed);
            return &self.data;
        }
        let stamp = self.stamped.acquire_write();
        self.write_stamp.store(stamp.raw(), Ordering::Relaxed);
        self.writers.store(1, Ordering::Relaxed);
        self.writer_thread.store(me, Ordering::Release);
        let saved = self.data.is_notify_enabled();
        self.saved_notify.store(saved, Ordering::Relaxed);
        self.data.set_notify_enabled(false);
        tracing::trace!(saved_notify = saved, "write section entered, notifications muted");
        &self.data
    }

    /// Releases one write acquisition.
    ///
    /// The outermost release restores the notification flag captured on
    /// entry, clears ownership, and leaves the physical write section, in
    /// that order, all inside the exclusive section. Fails if the calling
    /// thread does not hold the write section.
    pub fn write_unlock(&self) -> Result<&D, LockStateError> {
        let me = current_thread_id();
        if self.writer_thread.load(Ordering::Acquire) != me {
            tracing::error!("write_unlock without matching write_lock on this thread");
            return Err(LockStateError::UnmatchedWriteUnlock);
        }
        if self.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            let saved = self.saved_notify.load(Ordering::Relaxed);
            self.data.set_notify_enabled(saved);
            self.writer_thread.store(0, Ordering::Release);
            let stamp = Stamp::from_raw(self.write_stamp.load(Ordering::Relaxed));
            self.stamped.release_write(stamp);
            tracing::trace!(restored_notify = saved, "write section left, notifications restored");
        }
        Ok(&self.data)
    }

    /// Runs `work` inside the write section.
    ///
    /// Acquires via [`write_lock`](Self::write_lock), additionally mutes
    /// notifications at this call's own granularity (nested inside the
    /// lock-level muting), and guarantees that the local snapshot is
    /// restored and the write lock released on every exit path, including a
    /// panic propagating out of `work`.
    pub fn write_lock_guard<R>(&self, work: impl FnOnce(&D) -> R) -> R {
        self.write_lock();
        // Declared before the mute guard: locals drop in reverse order, so
        // the local snapshot is restored before the write lock is released.
        let _release = WriteRelease { lock: self };
        let _mute = MuteGuard::mute(&self.data);
        work(&self.data)
    }

    /// Acquires the write section held for the guard's lifetime.
    ///
    /// Reentrant with [`write_lock`](Self::write_lock) and other write
    /// guards on the same thread; dropping the guard is the matching unlock.
    #[must_use = "guard releases the write lock when dropped"]
    pub fn write(&self) -> WriteGuard<'_, D> {
        self.write_lock();
        WriteGuard { lock: self }
    }
}

/// Releases a combinator's physical read stamp on scope exit.
struct ReadStampRelease<'a> {
    stamped: &'a StampedLock,
    stamp: Stamp,
}

impl Drop for ReadStampRelease<'_> {
    fn drop(&mut self) {
        self.stamped.release_read(self.stamp);
    }
}

/// Releases a combinator's write acquisition on scope exit.
struct WriteRelease<'a, D: AutoNotify> {
    lock: &'a DataSetLock<D>,
}

impl<D: AutoNotify> Drop for WriteRelease<'_, D> {
    fn drop(&mut self) {
        // Balanced by construction; the unmatched-unlock path is unreachable.
        let _ = self.lock.write_unlock();
    }
}

/// RAII read guard; releases its logical read lock on drop.
#[must_use = "guard will be immediately released if not held"]
pub struct ReadGuard<'a, D> {
    lock: &'a DataSetLock<D>,
}

impl<D> Deref for ReadGuard<'_, D> {
    type Target = D;

    #[inline]
    fn deref(&self) -> &D {
        &self.lock.data
    }
}

impl<D> Drop for ReadGuard<'_, D> {
    #[inline]
    fn drop(&mut self) {
        // Balanced by construction.
        let _ = self.lock.read_unlock();
    }
}

/// RAII write guard; releases its write acquisition on drop.
#[must_use = "guard will be immediately released if not held"]
pub struct WriteGuard<'a, D: AutoNotify> {
    lock: &'a DataSetLock<D>,
}

impl<D: AutoNotify> Deref for WriteGuard<'_, D> {
    type Target = D;

    #[inline]
    fn deref(&self) -> &D {
        &self.lock.data
    }
}

impl<D: AutoNotify> Drop for WriteGuard<'_, D> {
    #[inline]
    fn drop(&mut self) {
        // Balanced by construction.
        let _ = self.lock.write_unlock();
    }
}
