use super::event::Event;
use super::interest::Interest;
use super::poller::{Poller, Waker};
use crate::error::{Result, TeeError};

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

/// A readiness callback.
///
/// Receives the reactor state, the registry (to register or unregister
/// descriptors, including itself), the descriptor and the satisfied
/// conditions. Returning `Err` aborts [`Reactor::run`] with that error.
pub type Callback<S> =
    Box<dyn FnMut(&mut S, &mut Registry<S>, RawFd, Interest) -> Result<()> + Send>;

struct Handler<S> {
    interest: Interest,

    /// `None` while the callback is running.
    callback: Option<Callback<S>>,
}

/// The set of descriptors a reactor watches, with their callbacks.
///
/// Callbacks get `&mut Registry` so they can change registrations while
/// being dispatched; a callback that re-registers its own descriptor
/// replaces itself.
pub struct Registry<S> {
    poller: Poller,
    handlers: HashMap<RawFd, Handler<S>>,
}

impl<S> Registry<S> {
    fn new(poller: Poller) -> Self {
        Self {
            poller,
            handlers: HashMap::new(),
        }
    }

    /// Registers `callback` for `interest` on `fd`.
    ///
    /// An existing registration for `fd` is overwritten (mask and callback).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the poller refuses the descriptor, typically
    /// `EBADF` for a descriptor that is no longer open.
    pub fn register<F>(&mut self, fd: RawFd, interest: Interest, callback: F) -> io::Result<()>
    where
        F: FnMut(&mut S, &mut Registry<S>, RawFd, Interest) -> Result<()> + Send + 'static,
    {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        if let Some(handler) = self.handlers.get_mut(&fd) {
            match self.poller.reregister(fd, interest) {
                // The kernel forgot the descriptor (closed and reopened
                // behind our back); start over.
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
                    self.poller.register(fd, interest)?;
                }
                result => result?,
            }

            handler.interest = interest;
            handler.callback = Some(Box::new(callback));
        } else {
            self.poller.register(fd, interest)?;
            self.handlers.insert(
                fd,
                Handler {
                    interest,
                    callback: Some(Box::new(callback)),
                },
            );
        }

        trace!(fd, ?interest, "registered");
        Ok(())
    }

    /// Removes the registration for `fd`.
    ///
    /// A no-op if `fd` is not registered or no longer valid.
    pub fn unregister(&mut self, fd: RawFd) {
        if self.handlers.remove(&fd).is_some() {
            let _ = self.poller.deregister(fd);
            trace!(fd, "unregistered");
        }
    }

    /// Re-applies the current interest of `fd` in the poller.
    ///
    /// A descriptor closed behind the registry's back is silently forgotten
    /// by epoll; re-arming surfaces that as `EBADF` (or `ENOENT` when the
    /// number was reused) instead of waiting for an event that never comes.
    ///
    /// # Errors
    ///
    /// Returns `ENOENT` if `fd` is not registered, or the poller's OS error.
    pub fn rearm(&mut self, fd: RawFd) -> io::Result<()> {
        let Some(handler) = self.handlers.get(&fd) else {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        };

        self.poller.reregister(fd, handler.interest)
    }

    /// Returns the interest `fd` is registered with, if any.
    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.handlers.get(&fd).map(|handler| handler.interest)
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.handlers.contains_key(&fd)
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the callback registered for `event.fd`, if any.
    fn dispatch(&mut self, state: &mut S, event: Event) -> Result<()> {
        // Stale event: an earlier callback in this batch unregistered it.
        let Some(handler) = self.handlers.get_mut(&event.fd) else {
            return Ok(());
        };

        let ready = event.satisfied(handler.interest);
        if ready.is_empty() {
            return Ok(());
        }

        let Some(mut callback) = handler.callback.take() else {
            return Ok(());
        };

        let result = callback(state, self, event.fd, ready);

        // Put the callback back unless it unregistered or replaced itself.
        if let Some(handler) = self.handlers.get_mut(&event.fd) {
            if handler.callback.is_none() {
                handler.callback = Some(callback);
            }
        }

        result
    }
}

struct Shared {
    stop: AtomicBool,
    running: AtomicBool,
    waker: Arc<Waker>,
}

/// Cross-thread handle onto a [`Reactor`].
///
/// Cheap to clone. [`stop`](Self::stop) is the only operation that may be
/// issued from outside the reactor thread.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    fn new(waker: Arc<Waker>) -> Self {
        Self {
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                waker,
            }),
        }
    }

    /// Asks the reactor to return from [`Reactor::run`] once the current
    /// callback finishes.
    ///
    /// Safe from any thread. A request made before `run` starts is honored
    /// when it does.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.waker.wake();
        debug!("reactor stop requested");
    }

    /// Returns `true` while [`Reactor::run`] is executing.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn take_stop_request(&self) -> bool {
        self.shared.stop.swap(false, Ordering::AcqRel)
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("running", &self.is_running())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

impl<S> std::fmt::Debug for Reactor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("handlers", &self.registry.handlers.len())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Clears the running flag however `run` exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A single-threaded readiness dispatcher owning some state `S`.
///
/// Callbacks registered through [`register`](Self::register) (or through the
/// [`Registry`] they receive) all get `&mut S`, so state shared between
/// callbacks needs no locking: only the thread running
/// [`run`](Self::run) ever touches it.
///
/// # Examples
///
/// ```rust,ignore
/// let mut reactor = Reactor::new(Vec::new())?;
/// reactor.register(fd, Interest::READABLE, |seen: &mut Vec<u8>, registry: &mut Registry<Vec<u8>>, fd, _| {
///     // read from fd, push into `seen`, unregister on EOF
///     Ok(())
/// })?;
/// reactor.run()?;
/// ```
pub struct Reactor<S> {
    registry: Registry<S>,
    state: S,
    handle: ReactorHandle,
}

impl<S> Reactor<S> {
    /// Creates a reactor around `state`, with nothing registered.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::PollerCreation`] if the OS poller cannot be set
    /// up (usually descriptor exhaustion).
    pub fn new(state: S) -> Result<Self> {
        let poller = Poller::new().map_err(TeeError::PollerCreation)?;
        let handle = ReactorHandle::new(poller.waker());

        Ok(Self {
            registry: Registry::new(poller),
            state,
            handle,
        })
    }

    /// Registers `callback` for `interest` on `fd`.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Register`] if the poller refuses the descriptor.
    pub fn register<F>(&mut self, fd: RawFd, interest: Interest, callback: F) -> Result<()>
    where
        F: FnMut(&mut S, &mut Registry<S>, RawFd, Interest) -> Result<()> + Send + 'static,
    {
        self.registry
            .register(fd, interest, callback)
            .map_err(|source| TeeError::register(fd, source))
    }

    /// Removes the registration for `fd`, if any.
    pub fn unregister(&mut self, fd: RawFd) {
        self.registry.unregister(fd);
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Consumes the reactor, returning its state.
    pub fn into_state(self) -> S {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut S, &mut Registry<S>) {
        (&mut self.state, &mut self.registry)
    }

    /// Returns a handle that can stop the reactor from another thread.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Dispatches callbacks until stopped or until nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Poll`] if waiting for readiness fails, or the
    /// first error returned by a callback.
    pub fn run(&mut self) -> Result<()> {
        let shared = self.handle.shared.clone();
        shared.running.store(true, Ordering::Release);
        let _running = RunningGuard(&shared.running);

        let mut events = Vec::with_capacity(64);

        loop {
            if self.handle.take_stop_request() {
                debug!(registered = self.registry.len(), "reactor stopped");
                return Ok(());
            }

            if self.registry.is_empty() {
                debug!("nothing left to watch, reactor exiting");
                return Ok(());
            }

            self.registry
                .poller
                .poll(&mut events, None)
                .map_err(TeeError::Poll)?;

            for event in events.drain(..) {
                if self.handle.stop_requested() {
                    break;
                }

                self.registry.dispatch(&mut self.state, event)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::unix::{sys_close, sys_pipe, sys_read, sys_write};
    use crate::test_utils::serial;

    #[test]
    fn run_returns_when_nothing_is_registered() {
        let _serial = serial();
        let mut reactor = Reactor::new(()).unwrap();

        reactor.run().unwrap();
        assert!(!reactor.handle().is_running());
    }

    #[test]
    fn stop_before_run_is_honored() {
        let _serial = serial();
        let (read_fd, write_fd) = sys_pipe().unwrap();

        let mut reactor = Reactor::new(0usize).unwrap();
        reactor
            .register(read_fd, Interest::READABLE, |count: &mut usize, _: &mut Registry<usize>, _, _| {
                *count += 1;
                Ok(())
            })
            .unwrap();

        reactor.handle().stop();
        reactor.run().unwrap();

        assert_eq!(*reactor.state(), 0);
        assert!(reactor.registry().is_registered(read_fd));

        drop(reactor);
        sys_close(read_fd).unwrap();
        sys_close(write_fd).unwrap();
    }

    #[test]
    fn callback_can_unregister_itself() {
        let _serial = serial();
        let (read_fd, write_fd) = sys_pipe().unwrap();
        sys_write(write_fd, b"ping").unwrap();

        let mut reactor = Reactor::new(Vec::new()).unwrap();
        reactor
            .register(
                read_fd,
                Interest::READABLE,
                |seen: &mut Vec<u8>, registry: &mut Registry<Vec<u8>>, fd, _| {
                    let mut buffer = [0u8; 16];
                    let n = sys_read(fd, &mut buffer).unwrap();
                    seen.extend_from_slice(&buffer[..n]);
                    registry.unregister(fd);
                    Ok(())
                },
            )
            .unwrap();

        reactor.run().unwrap();

        assert_eq!(reactor.state().as_slice(), b"ping");
        assert!(reactor.registry().is_empty());

        drop(reactor);
        sys_close(read_fd).unwrap();
        sys_close(write_fd).unwrap();
    }

    #[test]
    fn callback_error_aborts_run() {
        let _serial = serial();
        let (read_fd, write_fd) = sys_pipe().unwrap();
        sys_write(write_fd, b"x").unwrap();

        let mut reactor = Reactor::new(()).unwrap();
        reactor
            .register(read_fd, Interest::READABLE, |_: &mut (), _: &mut Registry<()>, fd, _| {
                Err(TeeError::InvalidDescriptor { fd })
            })
            .unwrap();

        let err = reactor.run().unwrap_err();
        assert!(matches!(err, TeeError::InvalidDescriptor { fd } if fd == read_fd));

        drop(reactor);
        sys_close(read_fd).unwrap();
        sys_close(write_fd).unwrap();
    }

    #[test]
    fn registering_a_closed_descriptor_fails_with_ebadf() {
        let _serial = serial();
        let mut reactor = Reactor::new(()).unwrap();

        let (read_fd, write_fd) = sys_pipe().unwrap();
        sys_close(read_fd).unwrap();
        sys_close(write_fd).unwrap();

        let err = reactor
            .register(read_fd, Interest::READABLE, |_: &mut (), _: &mut Registry<()>, _, _| Ok(()))
            .unwrap_err();

        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert!(reactor.registry().is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let _serial = serial();
        let mut reactor = Reactor::new(()).unwrap();

        reactor.unregister(12345);
        reactor.unregister(12345);
        assert!(reactor.registry().is_empty());
    }

    #[test]
    fn rearm_reports_a_descriptor_closed_behind_our_back() {
        let _serial = serial();
        let mut reactor = Reactor::new(()).unwrap();
        let (read_fd, write_fd) = sys_pipe().unwrap();

        reactor
            .register(write_fd, Interest::WRITABLE, |_: &mut (), _: &mut Registry<()>, _, _| Ok(()))
            .unwrap();
        assert!(reactor.registry.rearm(write_fd).is_ok());

        sys_close(write_fd).unwrap();
        let err = reactor.registry.rearm(write_fd).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));

        let err = reactor.registry.rearm(12345).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        drop(reactor);
        sys_close(read_fd).unwrap();
    }
}
