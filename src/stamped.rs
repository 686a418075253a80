//! Sequence-stamped reader/writer lock.
//!
//! [`StampedLock`] combines a blocking reader/writer section with a
//! monotonically increasing generation counter. Every acquisition returns an
//! opaque [`Stamp`]; optimistic readers obtain a stamp without blocking and
//! check it afterwards with [`StampedLock::validate`].
//!
//! The generation counter is odd exactly while a writer holds the exclusive
//! section. A validation succeeds only if the stamp is even (no writer was
//! active when it was issued) and the generation has not moved since. This
//! gives the happens-before edge between a completed write and any later
//! validation.
//!
//! # Example
//!
//! ```ignore
//! let lock = StampedLock::new();
//!
//! let stamp = lock.try_optimistic_read();
//! let snapshot = read_shared_state();
//! if !lock.validate(stamp) {
//!     // A writer intervened; fall back to a full read acquisition.
//!     let stamp = lock.acquire_read();
//!     let snapshot = read_shared_state();
//!     lock.release_read(stamp);
//! }
//! ```

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Opaque token returned by every acquisition.
///
/// A stamp is required to release or validate the acquisition it came from.
/// Stamps are `Copy` and carry the generation observed at issue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp(u64);

impl Stamp {
    #[inline]
    pub(crate) fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Default)]
struct WaitState {
    /// Number of threads inside the shared read section.
    readers: usize,
    /// Whether a writer holds the exclusive section.
    writer: bool,
}

/// A blocking reader/writer lock with sequence stamps and optimistic reads.
///
/// - Any number of readers may hold the shared section concurrently.
/// - A single writer holds the exclusive section; readers and other writers
///   block until it leaves.
/// - Optimistic readers never block: they take a stamp, read, and validate.
///
/// The lock is not reentrant and tracks no thread identity; those concerns
/// belong to the layer above (see [`DataSetLock`](crate::DataSetLock)).
#[derive(Debug, Default)]
pub struct StampedLock {
    /// Generation counter; odd while a writer holds the exclusive section.
    seq: AtomicU64,
    /// Reader/writer occupancy, guarded for blocking waits.
    state: Mutex<WaitState>,
    /// Readers and writers park here; releases use `notify_all` so a queued
    /// writer waiting out readers is never missed.
    cond: Condvar,
}

impl StampedLock {
    /// Creates an unlocked stamped lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the shared read section, blocking while a writer is active.
    pub fn acquire_read(&self) -> Stamp {
        let mut state = self.state.lock();
        while state.writer {
            self.cond.wait(&mut state);
        }
        state.readers += 1;
        drop(state);
        Stamp(self.seq.load(Ordering::Acquire))
    }

    /// Releases one shared read acquisition.
    pub fn release_read(&self, stamp: Stamp) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0, "release_read without acquisition");
        // The generation cannot move while readers occupy the section.
        debug_assert_eq!(stamp.raw(), self.seq.load(Ordering::Relaxed));
        state.readers -= 1;
        let last = state.readers == 0;
        drop(state);
        if last {
            self.cond.notify_all();
        }
    }

    /// Acquires the exclusive write section, blocking until no readers and
    /// no other writer are active.
    pub fn acquire_write(&self) -> Stamp {
        let mut state = self.state.lock();
        while state.writer || state.readers > 0 {
            self.cond.wait(&mut state);
        }
        state.writer = true;
        // Generation becomes odd while the section is held. Incrementing
        // under the state mutex keeps parity and occupancy in step, so an
        // optimistic stamp issued from here on can never validate.
        let seq = self.seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        drop(state);
        Stamp(seq)
    }

    /// Releases the exclusive write section, unblocking waiting readers and
    /// writers.
    pub fn release_write(&self, stamp: Stamp) {
        let mut state = self.state.lock();
        debug_assert!(state.writer, "release_write without acquisition");
        debug_assert_eq!(stamp.raw(), self.seq.load(Ordering::Relaxed));
        self.seq
            .store(stamp.raw().wrapping_add(1), Ordering::Release);
        state.writer = false;
        drop(state);
        self.cond.notify_all();
    }

    /// Returns a stamp without blocking, even while a writer is active.
    ///
    /// The stamp may already be stale; it means nothing until a subsequent
    /// [`validate`](Self::validate) succeeds.
    #[must_use]
    pub fn try_optimistic_read(&self) -> Stamp {
        Stamp(self.seq.load(Ordering::Acquire))
    }

    /// Returns true iff no write section started or completed since `stamp`
    /// was issued.
    #[must_use]
    pub fn validate(&self, stamp: Stamp) -> bool {
        // Order everything the optimistic section read before the
        // generation re-check.
        fence(Ordering::Acquire);
        stamp.raw() & 1 == 0 && self.seq.load(Ordering::Relaxed) == stamp.raw()
    }

    /// Best-effort query of whether a writer currently holds the section.
    #[must_use]
    pub fn is_write_held(&self) -> bool {
        self.seq.load(Ordering::Relaxed) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn multiple_readers_allowed() {
        init_test("multiple_readers_allowed");
        let lock = StampedLock::new();

        let stamp1 = lock.acquire_read();
        let stamp2 = lock.acquire_read();

        lock.release_read(stamp1);
        lock.release_read(stamp2);

        let held = lock.is_write_held();
        crate::assert_with_log!(!held, "no writer held", false, held);
        crate::test_complete!("multiple_readers_allowed");
    }

    #[test]
    fn write_excludes_readers() {
        init_test("write_excludes_readers");
        let lock = Arc::new(StampedLock::new());
        let entered = Arc::new(AtomicBool::new(false));

        let stamp = lock.acquire_write();

        let reader_lock = Arc::clone(&lock);
        let reader_entered = Arc::clone(&entered);
        let handle = thread::spawn(move || {
            let stamp = reader_lock.acquire_read();
            reader_entered.store(true, Ordering::Release);
            reader_lock.release_read(stamp);
        });

        thread::sleep(Duration::from_millis(20));
        let blocked = !entered.load(Ordering::Acquire);
        crate::assert_with_log!(blocked, "reader blocked by writer", true, blocked);

        lock.release_write(stamp);
        handle.join().expect("reader panicked");

        let done = entered.load(Ordering::Acquire);
        crate::assert_with_log!(done, "reader entered after release", true, done);
        crate::test_complete!("write_excludes_readers");
    }

    #[test]
    fn writer_waits_for_readers() {
        init_test("writer_waits_for_readers");
        let lock = Arc::new(StampedLock::new());
        let acquired = Arc::new(AtomicBool::new(false));

        let read_stamp = lock.acquire_read();

        let writer_lock = Arc::clone(&lock);
        let writer_acquired = Arc::clone(&acquired);
        let handle = thread::spawn(move || {
            let stamp = writer_lock.acquire_write();
            writer_acquired.store(true, Ordering::Release);
            writer_lock.release_write(stamp);
        });

        thread::sleep(Duration::from_millis(20));
        let blocked = !acquired.load(Ordering::Acquire);
        crate::assert_with_log!(blocked, "writer blocked by reader", true, blocked);

        lock.release_read(read_stamp);
        handle.join().expect("writer panicked");

        let done = acquired.load(Ordering::Acquire);
        crate::assert_with_log!(done, "writer acquired after release", true, done);
        crate::test_complete!("writer_waits_for_readers");
    }

    #[test]
    fn optimistic_stamp_validates_without_writer() {
        init_test("optimistic_stamp_validates_without_writer");
        let lock = StampedLock::new();

        let stamp = lock.try_optimistic_read();
        let valid = lock.validate(stamp);
        crate::assert_with_log!(valid, "stamp valid with no writer", true, valid);
        crate::test_complete!("optimistic_stamp_validates_without_writer");
    }

    #[test]
    fn optimistic_stamp_invalidated_by_completed_write() {
        init_test("optimistic_stamp_invalidated_by_completed_write");
        let lock = StampedLock::new();

        let optimistic = lock.try_optimistic_read();
        let write = lock.acquire_write();
        lock.release_write(write);

        let valid = lock.validate(optimistic);
        crate::assert_with_log!(!valid, "stamp stale after write", false, valid);
        crate::test_complete!("optimistic_stamp_invalidated_by_completed_write");
    }

    #[test]
    fn optimistic_stamp_stale_while_writer_active() {
        init_test("optimistic_stamp_stale_while_writer_active");
        let lock = StampedLock::new();

        let write = lock.acquire_write();
        let optimistic = lock.try_optimistic_read();

        let valid = lock.validate(optimistic);
        crate::assert_with_log!(!valid, "stamp issued mid-write is stale", false, valid);

        lock.release_write(write);
        crate::test_complete!("optimistic_stamp_stale_while_writer_active");
    }

    #[test]
    fn write_held_tracks_exclusive_section() {
        init_test("write_held_tracks_exclusive_section");
        let lock = StampedLock::new();

        let before = lock.is_write_held();
        crate::assert_with_log!(!before, "not held initially", false, before);

        let stamp = lock.acquire_write();
        let during = lock.is_write_held();
        crate::assert_with_log!(during, "held during write", true, during);

        lock.release_write(stamp);
        let after = lock.is_write_held();
        crate::assert_with_log!(!after, "not held after release", false, after);
        crate::test_complete!("write_held_tracks_exclusive_section");
    }

    #[test]
    fn write_stamps_increase() {
        init_test("write_stamps_increase");
        let lock = StampedLock::new();

        let first = lock.acquire_write();
        lock.release_write(first);
        let second = lock.acquire_write();
        lock.release_write(second);

        let increased = second.raw() > first.raw();
        crate::assert_with_log!(increased, "generation is monotonic", true, increased);
        crate::test_complete!("write_stamps_increase");
    }

    #[test]
    fn queued_writers_drain_one_by_one() {
        init_test("queued_writers_drain_one_by_one");
        let lock = Arc::new(StampedLock::new());
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let read_stamp = lock.acquire_read();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let lock = Arc::clone(&lock);
            let completed = Arc::clone(&completed);
            handles.push(thread::spawn(move || {
                let stamp = lock.acquire_write();
                completed.fetch_add(1, Ordering::AcqRel);
                lock.release_write(stamp);
            }));
        }

        thread::sleep(Duration::from_millis(20));
        let none_yet = completed.load(Ordering::Acquire);
        crate::assert_with_log!(none_yet == 0, "writers wait behind reader", 0usize, none_yet);

        lock.release_read(read_stamp);
        for handle in handles {
            handle.join().expect("writer panicked");
        }

        let all = completed.load(Ordering::Acquire);
        crate::assert_with_log!(all == 3, "all writers completed", 3usize, all);
        crate::test_complete!("queued_writers_drain_one_by_one");
    }
}
