use super::Tee;
use super::buffer::BufferStore;
use super::engine::{TeeState, reader};
use crate::error::{Result, TeeError};
use crate::fd::unix::sys_isatty;
use crate::fd::{AsDescriptor, SavedFlags, ensure_fd, enter_nonblocking};
use crate::reactor::{Interest, Reactor};

use std::os::fd::RawFd;

use tracing::{debug, warn};

/// Default number of bytes read from the input per readiness event.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default number of immediate retries on `EINTR` / `EAGAIN` before a
/// callback yields back to the reactor.
pub const DEFAULT_TRANSIENT_RETRIES: usize = 16;

/// Builder for configuring and creating a tee session.
///
/// # Examples
///
/// ```rust,ignore
/// let tee = TeeBuilder::new()
///     .buffer_size(64 * 1024)
///     .build(input.read_fd(), [left.write_fd(), right.write_fd()])?;
/// ```
#[derive(Debug, Clone)]
pub struct TeeBuilder {
    /// Maximum bytes per read.
    buffer_size: usize,

    /// Immediate retries on transient errors.
    transient_retries: usize,

    /// Put descriptors in non-blocking mode before starting.
    nonblocking: bool,
}

impl TeeBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
            nonblocking: true,
        }
    }

    /// Sets the maximum number of bytes read from the input at once.
    ///
    /// Must be greater than zero; [`build`](Self::build) rejects `0`.
    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    /// Sets how many times a read or write is retried immediately on
    /// `EINTR` / `EAGAIN` before waiting for the next readiness event.
    pub fn transient_retries(mut self, n: usize) -> Self {
        self.transient_retries = n;
        self
    }

    /// Whether to set `O_NONBLOCK` on the input and outputs (default: yes).
    ///
    /// Terminals are never touched. The original flags are put back on each
    /// descriptor as it leaves the session. With this disabled, a write larger than
    /// the space left in an output may block the reactor thread.
    pub fn nonblocking(mut self, enabled: bool) -> Self {
        self.nonblocking = enabled;
        self
    }

    /// Creates a tee session reading `input` and copying to `outputs`.
    ///
    /// Only the input is registered at this point; nothing happens until
    /// the returned reactor runs. Duplicate outputs are collapsed.
    ///
    /// With no outputs the input is released right away and left untouched;
    /// running the returned reactor returns immediately.
    ///
    /// # Errors
    ///
    /// - [`TeeError::ZeroBufferSize`] if the buffer size is `0`
    /// - [`TeeError::InvalidDescriptor`] if a descriptor cannot be resolved
    /// - [`TeeError::Configure`] if the input cannot be made non-blocking
    /// - [`TeeError::PollerCreation`] / [`TeeError::Register`] if the
    ///   reactor cannot be set up or refuses the input
    pub fn build<I, O, D>(self, input: I, outputs: O) -> Result<Tee>
    where
        I: AsDescriptor,
        O: IntoIterator<Item = D>,
        D: AsDescriptor,
    {
        if self.buffer_size == 0 {
            return Err(TeeError::ZeroBufferSize);
        }

        let input = ensure_fd(input)?;
        let outputs = outputs
            .into_iter()
            .map(ensure_fd)
            .collect::<Result<Vec<RawFd>>>()?;

        if outputs.is_empty() {
            debug!(input, "no outputs, releasing input");

            let mut state = TeeState::new(
                input,
                BufferStore::new(outputs),
                self.buffer_size,
                self.transient_retries,
                None,
            );
            state.release_input();

            return Reactor::new(state);
        }

        let mut saved = Vec::new();
        if self.nonblocking {
            if let Err(err) = configure(input, &outputs, &mut saved) {
                restore_all(&saved);
                return Err(err);
            }
        }

        debug!(
            input,
            ?outputs,
            buffer_size = self.buffer_size,
            "starting tee session"
        );

        let store = BufferStore::new(outputs);
        let state = TeeState::new(
            input,
            store,
            self.buffer_size,
            self.transient_retries,
            saved.iter().copied(),
        );

        let registered = Reactor::new(state).and_then(|mut reactor| {
            reactor.register(input, Interest::READABLE | Interest::ERROR, reader)?;
            Ok(reactor)
        });

        if registered.is_err() {
            restore_all(&saved);
        }

        registered
    }
}

/// Puts every descriptor that is not a terminal in non-blocking mode,
/// recording in `saved` the flags each one had.
fn configure(input: RawFd, outputs: &[RawFd], saved: &mut Vec<SavedFlags>) -> Result<()> {
    if !sys_isatty(input) {
        saved.extend(enter_nonblocking(input)?);
    }

    for &fd in outputs {
        if sys_isatty(fd) {
            continue;
        }

        match enter_nonblocking(fd) {
            Ok(flags) => saved.extend(flags),
            // Dropped on its first registration.
            Err(err) if err.raw_os_error() == Some(libc::EBADF) => {
                debug!(fd, "output descriptor is already invalid");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

fn restore_all(saved: &[SavedFlags]) {
    for flags in saved {
        if let Err(err) = flags.restore() {
            warn!(fd = flags.fd(), error = %err, "failed to restore descriptor flags");
        }
    }
}

impl Default for TeeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::{Pipe, is_nonblocking};
    use crate::tee::InputState;
    use crate::test_utils::serial;

    #[test]
    fn zero_buffer_size_is_rejected() {
        let err = TeeBuilder::new()
            .buffer_size(0)
            .build(0, Vec::<RawFd>::new())
            .unwrap_err();

        assert!(matches!(err, TeeError::ZeroBufferSize));
    }

    #[test]
    fn negative_output_descriptor_is_rejected() {
        let _serial = serial();
        let pipe = Pipe::new().unwrap();

        let err = TeeBuilder::new()
            .build(pipe.read_fd(), [pipe.write_fd(), -3])
            .unwrap_err();

        assert!(matches!(err, TeeError::InvalidDescriptor { fd: -3 }));
    }

    #[test]
    fn only_the_input_is_registered_at_first() {
        let _serial = serial();
        let left = Pipe::new().unwrap();
        let right = Pipe::new().unwrap();

        let tee = TeeBuilder::new()
            .buffer_size(16)
            .build(left.read_fd(), [right.write_fd()])
            .unwrap();

        assert!(tee.registry().is_registered(left.read_fd()));
        assert!(!tee.registry().is_registered(right.write_fd()));
        assert_eq!(tee.state().live_outputs(), vec![right.write_fd()]);
        assert_eq!(tee.state().input(), left.read_fd());
    }

    #[test]
    fn no_outputs_release_the_input_untouched() {
        let _serial = serial();
        let pipe = Pipe::new().unwrap();

        let tee = TeeBuilder::new()
            .build(pipe.read_fd(), Vec::<RawFd>::new())
            .unwrap();

        assert!(tee.registry().is_empty());
        assert_eq!(tee.state().input_state(), InputState::Released);
        assert!(!is_nonblocking(pipe.read_fd()).unwrap());
    }

    #[test]
    fn flags_set_by_the_session_can_be_put_back() {
        let _serial = serial();
        let left = Pipe::new().unwrap();
        let right = Pipe::new().unwrap();
        let already = Pipe::nonblocking().unwrap();

        let mut tee = TeeBuilder::new()
            .build(left.read_fd(), [right.write_fd(), already.write_fd()])
            .unwrap();
        assert!(is_nonblocking(left.read_fd()).unwrap());
        assert!(is_nonblocking(right.write_fd()).unwrap());

        tee.state_mut().restore_flags();

        assert!(!is_nonblocking(left.read_fd()).unwrap());
        assert!(!is_nonblocking(right.write_fd()).unwrap());
        // Was non-blocking before the session, stays that way.
        assert!(is_nonblocking(already.write_fd()).unwrap());
    }

    #[test]
    fn blocking_mode_can_be_left_alone() {
        let _serial = serial();
        let left = Pipe::new().unwrap();
        let right = Pipe::new().unwrap();

        let _tee = TeeBuilder::new()
            .nonblocking(false)
            .build(left.read_fd(), [right.write_fd()])
            .unwrap();

        assert!(!is_nonblocking(left.read_fd()).unwrap());
        assert!(!is_nonblocking(right.write_fd()).unwrap());
    }
}
