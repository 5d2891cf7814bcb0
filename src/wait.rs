//! The interface captured for the external poll loop.
//!
//! The poll/event loop itself (`fd_wait`, `immediate_wake`, `timer_wait` in
//! the original design) is out of scope for this crate: it's the
//! higher-level stream framework's job to own an actual reactor. What this
//! crate provides instead is, for every operation that can return
//! [`crate::Error::WouldBlock`], a matching `wait_*` method that reports
//! exactly what the caller's loop should arm before retrying.

use std::os::unix::io::RawFd;

/// What the external poll loop should wait for before the caller retries
/// the operation this was returned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// The operation is expected to succeed immediately; schedule an
    /// immediate wake rather than waiting on the fd at all.
    Immediate,
    /// Wait for `fd` to become readable.
    Readable(RawFd),
    /// Wait for `fd` to become writable.
    Writable(RawFd),
    /// Nothing to wait for (e.g. a closed stream).
    None,
}

/// The directional block signal recorded after a read or write attempt.
///
/// Named `Want` rather than `Direction` because it records a *want*, not a
/// fact: `Reading` means "the last attempt needs the socket to become
/// readable before a retry can succeed," not "a read is in progress."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Want {
    #[default]
    Nothing,
    Reading,
    Writing,
}

impl Want {
    pub(crate) fn to_wait_event(self, fd: RawFd) -> WaitEvent {
        match self {
            Want::Nothing => WaitEvent::Immediate,
            Want::Reading => WaitEvent::Readable(fd),
            Want::Writing => WaitEvent::Writable(fd),
        }
    }
}
