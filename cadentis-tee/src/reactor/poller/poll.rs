//! Portable `poll(2)` poller for Unix targets without epoll.
//!
//! Exposes the same interface as the epoll backend. Interest lives in a
//! plain map and the `pollfd` array is rebuilt on every call, so
//! registration is only validated (`EBADF`) and never touches the kernel.
//! Wake-ups go through a non-blocking self-pipe.

use super::common::Waker;
use crate::fd::unix::{sys_check_fd, sys_close, sys_pipe, sys_read, sys_set_nonblocking};
use crate::reactor::event::Event;
use crate::reactor::interest::Interest;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, poll, pollfd};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// `poll(2)` poller.
pub(crate) struct PollPoller {
    /// Registered descriptors and their interest.
    interests: HashMap<RawFd, Interest>,

    /// Reusable `pollfd` array; slot 0 is the wake pipe.
    fds: Vec<pollfd>,

    /// Read end of the self-pipe.
    wake_read: RawFd,

    /// Write end of the self-pipe.
    waker: Arc<Waker>,
}

impl Waker {
    /// Wakes the poller by writing one byte to the self-pipe.
    pub(crate) fn wake(&self) {
        let buf = 1u8;
        unsafe {
            libc::write(self.0, (&raw const buf).cast(), 1);
        }
    }
}

impl PollPoller {
    /// Creates the poller and its self-pipe.
    pub(crate) fn new() -> io::Result<Self> {
        let (wake_read, wake_write) = sys_pipe()?;
        let waker = Arc::new(Waker(wake_write));

        if let Err(err) = sys_set_nonblocking(wake_read, true)
            .and_then(|()| sys_set_nonblocking(wake_write, true))
        {
            let _ = sys_close(wake_read);
            return Err(err);
        }

        Ok(Self {
            interests: HashMap::new(),
            fds: Vec::with_capacity(64),
            wake_read,
            waker,
        })
    }

    /// Returns the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Registers a descriptor.
    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        sys_check_fd(fd)?;
        self.interests.insert(fd, interest);
        Ok(())
    }

    /// Updates the interest of an already registered descriptor.
    pub(crate) fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.register(fd, interest)
    }

    /// Removes a descriptor.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.interests.remove(&fd);
        Ok(())
    }

    /// Polls for readiness events.
    ///
    /// Blocks until a descriptor becomes ready, the waker fires or the
    /// timeout expires. An interrupted wait returns with no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();
        self.fds.clear();

        self.fds.push(pollfd {
            fd: self.wake_read,
            events: POLLIN,
            revents: 0,
        });

        for (&fd, interest) in &self.interests {
            let mut flags = 0;
            if interest.is_readable() {
                flags |= POLLIN;
            }
            if interest.is_writable() {
                flags |= POLLOUT;
            }

            self.fds.push(pollfd {
                fd,
                events: flags,
                revents: 0,
            });
        }

        let timeout_ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as i32);

        let n = unsafe { poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        // Wake-up event
        if self.fds[0].revents & POLLIN != 0 {
            let mut buf = [0u8; 64];
            while matches!(sys_read(self.wake_read, &mut buf), Ok(n) if n > 0) {}
        }

        for entry in &self.fds[1..] {
            let flags = entry.revents;
            if flags == 0 {
                continue;
            }

            events.push(Event {
                fd: entry.fd,
                readable: flags & POLLIN != 0,
                writable: flags & POLLOUT != 0,
                error: flags & (POLLERR | POLLNVAL) != 0,
                hangup: flags & POLLHUP != 0,
            });
        }

        Ok(())
    }
}

impl Drop for PollPoller {
    fn drop(&mut self) {
        let _ = sys_close(self.wake_read);
    }
}
