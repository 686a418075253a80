//! Reentrant data-set locking for shared chart/series data.
//!
//! Chart data sets are mutated by producer threads while renderers and
//! listeners read them concurrently. This crate provides the concurrency
//! guard for that pattern: a reentrant, single-writer/multi-reader lock with
//! optimistic (lock-free on the happy path) reads, panic-safe guard
//! combinators, and automatic muting of the data set's change-notification
//! flag for the duration of the outermost write section.
//!
//! # Components
//!
//! - [`StampedLock`]: the underlying sequence-stamped primitive: exclusive
//!   write mode, shared read mode, and optimistic-read stamps that are
//!   validated after the fact instead of blocking writers.
//! - [`DataSetLock`]: the lock callers use, with logical read counting over a
//!   single physical acquisition, same-thread write reentrancy, manual
//!   lock/unlock pairs, guard combinators, and RAII guards.
//! - [`AutoNotify`] and [`MuteGuard`]: the notification-flag capability
//!   contract of the protected resource and the scoped muting built on it.
//!
//! # Example
//!
//! ```
//! use dataset_lock::{AutoNotify, DataSetLock};
//! use std::sync::atomic::AtomicBool;
//!
//! // The smallest possible resource: the notification flag itself.
//! let lock = DataSetLock::new(AtomicBool::new(true));
//!
//! // Notifications are muted for the duration of the write section and
//! // restored once the outermost write ends.
//! lock.write_lock_guard(|flag| {
//!     assert!(!flag.is_notify_enabled());
//! });
//!
//! let enabled = lock.read_lock_guard(|flag| flag.is_notify_enabled());
//! assert!(enabled);
//! ```
//!
//! # Threading model
//!
//! Any number of OS threads, no async runtime. Blocking acquisitions wait
//! indefinitely; optimistic reads never block. A thread holding read locks
//! that attempts a write lock deadlocks against itself; upgrade is not
//! supported.

pub mod lock;
pub mod notify;
pub mod stamped;
pub mod test_utils;

pub use lock::{DataSetLock, LockStateError, ReadGuard, WriteGuard};
pub use notify::{AutoNotify, MuteGuard};
pub use stamped::{Stamp, StampedLock};
