//! Linux `epoll`-based poller.
//!
//! Responsibilities:
//! - Register descriptors with read/write interests (level-triggered)
//! - Block waiting for readiness
//! - Wake up when another thread asks the reactor to stop
//!
//! Descriptors epoll refuses with `EPERM` (regular files, some character
//! devices) never block, so they are kept in an always-ready set and
//! reported on every poll instead of failing registration.

use super::common::Waker;
use crate::fd::unix::sys_close;
use crate::reactor::event::Event;
use crate::reactor::interest::Interest;

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
    eventfd,
};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used for the wake-up event.
///
/// Tokens are descriptors, which are never negative, so `u64::MAX` cannot
/// collide with them.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// Owns the `epoll` instance, a reusable event buffer and the `eventfd`
/// based [`Waker`].
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,

    /// Descriptors epoll cannot watch, with their interest.
    always_ready: HashMap<RawFd, Interest>,
}

impl Waker {
    /// Wakes the poller.
    ///
    /// Writes to the internal `eventfd`, causing `epoll_wait` to return.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, (&raw const buf).cast(), 8);
        }
    }
}

impl EpollPoller {
    /// Creates the epoll instance and its wake-up `eventfd`.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            let _ = sys_close(epoll);
            return Err(err);
        }
        let waker = Arc::new(Waker(wake_fd));

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, wake_fd, &raw mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            let _ = sys_close(epoll);
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(64),
            waker,
            always_ready: HashMap::new(),
        })
    }

    /// Returns the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Registers a descriptor.
    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        match self.ctl(EPOLL_CTL_ADD, fd, interest) {
            Err(err) if err.raw_os_error() == Some(libc::EPERM) => {
                self.always_ready.insert(fd, interest);
                Ok(())
            }
            result => result,
        }
    }

    /// Updates the interest of an already registered descriptor.
    pub(crate) fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if let Some(current) = self.always_ready.get_mut(&fd) {
            *current = interest;
            return Ok(());
        }

        self.ctl(EPOLL_CTL_MOD, fd, interest)
    }

    /// Removes a descriptor.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        if self.always_ready.remove(&fd).is_some() {
            return Ok(());
        }

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.is_readable() {
            flags |= EPOLLIN;
        }
        if interest.is_writable() {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &raw mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

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

        let timeout = if self.always_ready.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        let timeout_ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as i32);

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            // Wake-up event
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, (&raw mut buf).cast(), 8);
                }
                continue;
            }

            let flags = ev.events;
            events.push(Event {
                fd: ev.u64 as RawFd,
                readable: flags & EPOLLIN as u32 != 0,
                writable: flags & EPOLLOUT as u32 != 0,
                error: flags & EPOLLERR as u32 != 0,
                hangup: flags & EPOLLHUP as u32 != 0,
            });
        }

        for (&fd, interest) in &self.always_ready {
            events.push(Event {
                fd,
                readable: interest.is_readable(),
                writable: interest.is_writable(),
                error: false,
                hangup: false,
            });
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        let _ = sys_close(self.epoll);
    }
}
