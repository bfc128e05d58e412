use super::interest::Interest;

use std::os::fd::RawFd;

/// A readiness event reported by the poller.
///
/// The poller reports what the OS said; [`Event::satisfied`] turns it into
/// the set of conditions a callback registered for `interest` gets to see.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    /// Descriptor the event belongs to.
    pub(crate) fd: RawFd,

    /// Data can be read.
    pub(crate) readable: bool,

    /// Data can be written.
    pub(crate) writable: bool,

    /// The descriptor is in an error state.
    pub(crate) error: bool,

    /// The peer hung up.
    pub(crate) hangup: bool,
}

impl Event {
    /// Conditions satisfied for a registration with the given interest.
    ///
    /// ERROR is reported whatever the mask says. A hang-up is reported as
    /// READABLE to readers, since the pending read returns end of stream
    /// after any buffered data, and as ERROR to write-only registrations.
    pub(crate) fn satisfied(&self, interest: Interest) -> Interest {
        let mut ready = Interest::empty();

        if interest.is_readable() && (self.readable || self.hangup) {
            ready |= Interest::READABLE;
        }

        if interest.is_writable() && self.writable {
            ready |= Interest::WRITABLE;
        }

        if self.error || (self.hangup && !interest.is_readable()) {
            ready |= Interest::ERROR;
        }

        ready
    }
}
