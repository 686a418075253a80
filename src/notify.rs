//! Notification-flag contract and scoped muting.
//!
//! Data sets notify listeners automatically when mutated. During a batch of
//! mutations under a write section those notifications are muted so
//! listeners see one consistent update instead of a storm of partial ones.
//!
//! [`AutoNotify`] is the capability the lock requires of a protected
//! resource. [`MuteGuard`] captures the current flag, disables it, and
//! restores the captured value on drop. It is the muting step of
//! [`DataSetLock`](crate::DataSetLock), kept separate so it stays usable and
//! testable on its own and the core lock stays free of notification
//! concerns.

use std::sync::atomic::{AtomicBool, Ordering};

/// Capability contract of a resource whose change notifications can be
/// switched off temporarily.
///
/// Implementations use interior mutability: the flag must be togglable
/// through a shared reference because the lock hands out `&D` on every path,
/// and it may be observed concurrently with a writer toggling it.
///
/// While a write section is held, the flag is owned by the lock; callers
/// must not toggle it from outside the section.
pub trait AutoNotify {
    /// Returns whether automatic change notification is currently enabled.
    fn is_notify_enabled(&self) -> bool;

    /// Enables or disables automatic change notification.
    fn set_notify_enabled(&self, enabled: bool);
}

/// The smallest possible notifying resource: the flag itself.
impl AutoNotify for AtomicBool {
    #[inline]
    fn is_notify_enabled(&self) -> bool {
        self.load(Ordering::Acquire)
    }

    #[inline]
    fn set_notify_enabled(&self, enabled: bool) {
        self.store(enabled, Ordering::Release);
    }
}

/// Mutes a resource's notifications for a lexical scope.
///
/// Captures the current flag on construction and disables it; restores the
/// captured value on drop, on every exit path including unwind. Guards nest:
/// each inner guard captures the (already muted) state and restores it,
/// leaving the outermost guard to reinstate the original value.
#[must_use = "notifications are restored when the guard is dropped"]
pub struct MuteGuard<'a, D: AutoNotify + ?Sized> {
    resource: &'a D,
    saved: bool,
}

impl<'a, D: AutoNotify + ?Sized> MuteGuard<'a, D> {
    /// Captures the resource's current notification flag and disables it.
    pub fn mute(resource: &'a D) -> Self {
        let saved = resource.is_notify_enabled();
        resource.set_notify_enabled(false);
        Self { resource, saved }
    }

    /// The flag value captured at construction.
    #[must_use]
    pub fn saved(&self) -> bool {
        self.saved
    }
}

impl<D: AutoNotify + ?Sized> Drop for MuteGuard<'_, D> {
    fn drop(&mut self) {
        self.resource.set_notify_enabled(self.saved);
    }
}
