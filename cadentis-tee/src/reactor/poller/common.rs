use crate::fd::unix::sys_close;

use std::os::fd::RawFd;

/// Cross-thread wake-up handle for a blocked poller.
///
/// Wraps the descriptor a poller watches for wake-ups (an `eventfd` on
/// Linux, the write end of a self-pipe elsewhere). `wake()` is implemented
/// by the active backend. The descriptor is closed when the last handle
/// goes away, which may be after the poller itself.
#[derive(Debug)]
pub(crate) struct Waker(pub(crate) RawFd);

impl Drop for Waker {
    fn drop(&mut self) {
        let _ = sys_close(self.0);
    }
}
