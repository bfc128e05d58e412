use super::buffer::{BufferStore, Flush, OutputState};
use crate::error::{Result, TeeError};
use crate::fd::errno::{ErrorClass, Side, classify_io};
use crate::fd::{SavedFlags, close_fd};
use crate::fd::unix::{sys_read, sys_write};
use crate::reactor::{Interest, Registry};

use std::collections::BTreeMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use tracing::{debug, trace, warn};

/// Lifecycle of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Registered for reads.
    Observed,
    /// No live outputs were left; unregistered but left open for the caller.
    Released,
    /// End of stream or error; unregistered and closed by the session.
    Closed,
}

enum Read {
    Data(Arc<[u8]>),
    Eof,
    Blocked,
    Terminal(io::Error),
    Fatal(io::Error),
}

/// State of one tee session, owned by its reactor.
///
/// All mutation happens in the read and write callbacks on the reactor
/// thread. The accessors are for diagnostics once the reactor has been
/// handed back (see [`Background::wait`](crate::reactor::Background::wait)).
#[derive(Debug)]
pub struct TeeState {
    input: RawFd,
    input_state: InputState,
    read_buffer: Vec<u8>,
    bytes_read: u64,
    transient_retries: usize,
    outputs: BufferStore,

    /// Flags to put back on each descriptor the session made non-blocking.
    saved_flags: BTreeMap<RawFd, SavedFlags>,
}

impl TeeState {
    pub(crate) fn new(
        input: RawFd,
        outputs: BufferStore,
        buffer_size: usize,
        transient_retries: usize,
        saved_flags: impl IntoIterator<Item = SavedFlags>,
    ) -> Self {
        Self {
            input,
            input_state: InputState::Observed,
            read_buffer: vec![0; buffer_size],
            bytes_read: 0,
            transient_retries,
            outputs,
            saved_flags: saved_flags
                .into_iter()
                .map(|flags| (flags.fd(), flags))
                .collect(),
        }
    }

    /// Gives up on the input before it is ever observed.
    pub(crate) fn release_input(&mut self) {
        self.input_state = InputState::Released;
        self.restore_flags_of(self.input);
    }

    /// The input descriptor.
    pub fn input(&self) -> RawFd {
        self.input
    }

    pub fn input_state(&self) -> InputState {
        self.input_state
    }

    /// Returns `true` unless the session closed the input.
    pub fn is_input_open(&self) -> bool {
        self.input_state != InputState::Closed
    }

    /// Returns `true` once the input ended and outputs are being flushed.
    pub fn is_draining(&self) -> bool {
        self.input_state == InputState::Closed
    }

    /// Total bytes read from the input.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// State of the output on `fd`, if it belongs to this session.
    pub fn output_state(&self, fd: RawFd) -> Option<OutputState> {
        self.outputs.get(fd).map(|output| output.state())
    }

    /// Bytes written so far to the output on `fd`.
    pub fn bytes_written(&self, fd: RawFd) -> Option<u64> {
        self.outputs.get(fd).map(|output| output.written_bytes())
    }

    /// Bytes still queued for the output on `fd`.
    pub fn queued_bytes(&self, fd: RawFd) -> Option<usize> {
        self.outputs.get(fd).map(|output| output.queued_bytes())
    }

    /// Descriptors of the outputs still receiving data.
    pub fn live_outputs(&self) -> Vec<RawFd> {
        self.outputs.live_fds()
    }

    /// Puts back the file status flags of every descriptor the session
    /// still holds in non-blocking mode.
    ///
    /// Released inputs and dropped or closed outputs get their flags back
    /// as they leave the session. A session cut short with
    /// [`Background::stop`](crate::reactor::Background::stop) leaves the
    /// rest non-blocking until this is called.
    pub fn restore_flags(&mut self) {
        let fds: Vec<RawFd> = self.saved_flags.keys().copied().collect();
        for fd in fds {
            self.restore_flags_of(fd);
        }
    }

    /// Read callback for the input.
    pub(crate) fn on_input(
        &mut self,
        registry: &mut Registry<Self>,
        fd: RawFd,
        ready: Interest,
    ) -> Result<()> {
        self.on_input_with(registry, fd, ready, |buffer| sys_read(fd, buffer))
    }

    fn on_input_with<R>(
        &mut self,
        registry: &mut Registry<Self>,
        fd: RawFd,
        ready: Interest,
        read: R,
    ) -> Result<()>
    where
        R: FnMut(&mut [u8]) -> io::Result<usize>,
    {
        if ready.is_error() {
            debug!(fd, "error condition on input");
            return self.shut_down_input(registry);
        }

        if !self.outputs.has_live() {
            debug!(fd, "no live outputs left, releasing input");
            registry.unregister(fd);
            self.release_input();
            return Ok(());
        }

        match self.read_input(read) {
            Read::Data(chunk) => self.fan_out(registry, chunk),
            Read::Eof => {
                debug!(fd, bytes_read = self.bytes_read, "input reached end of stream");
                self.shut_down_input(registry)
            }
            Read::Terminal(err) => {
                debug!(fd, error = %err, "input failed");
                self.shut_down_input(registry)
            }
            Read::Blocked => Ok(()),
            Read::Fatal(source) => Err(TeeError::Read { fd, source }),
        }
    }

    /// Write callback for one output.
    ///
    /// `terminating` is set on the callbacks installed once the input ended:
    /// an output whose queue runs empty is then closed instead of idled.
    pub(crate) fn on_output(
        &mut self,
        registry: &mut Registry<Self>,
        fd: RawFd,
        ready: Interest,
        terminating: bool,
    ) -> Result<()> {
        self.on_output_with(registry, fd, ready, terminating, |bytes| sys_write(fd, bytes))
    }

    fn on_output_with<W>(
        &mut self,
        registry: &mut Registry<Self>,
        fd: RawFd,
        ready: Interest,
        terminating: bool,
        write: W,
    ) -> Result<()>
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        let retries = self.transient_retries;

        let Some(output) = self.outputs.live_mut(fd) else {
            registry.unregister(fd);
            return Ok(());
        };

        if ready.is_error() {
            debug!(fd, "error condition on output, dropping it");
            self.drop_output(registry, fd);
            return Ok(());
        }

        match output.flush_front(retries, write) {
            Flush::Idle => {
                registry.unregister(fd);
                if terminating {
                    self.close_output(fd);
                }
            }
            Flush::Wrote(n) => trace!(fd, n, "wrote to output"),
            Flush::Blocked => trace!(fd, "output not ready, waiting for next event"),
            Flush::Terminal(err) => {
                debug!(fd, error = %err, "output failed, dropping it");
                self.drop_output(registry, fd);
            }
            Flush::Fatal(source) => return Err(TeeError::Write { fd, source }),
        }

        Ok(())
    }

    fn read_input<R>(&mut self, mut read: R) -> Read
    where
        R: FnMut(&mut [u8]) -> io::Result<usize>,
    {
        let mut attempts = 0;

        loop {
            match read(&mut self.read_buffer) {
                Ok(0) => return Read::Eof,
                Ok(n) => {
                    self.bytes_read += n as u64;
                    trace!(fd = self.input, n, "read from input");
                    return Read::Data(Arc::from(&self.read_buffer[..n]));
                }
                Err(err) => match classify_io(Side::Read, &err) {
                    ErrorClass::Transient if attempts < self.transient_retries => attempts += 1,
                    ErrorClass::Transient => return Read::Blocked,
                    ErrorClass::Terminal => return Read::Terminal(err),
                    ErrorClass::Fatal => return Read::Fatal(err),
                },
            }
        }
    }

    /// Queues `chunk` on every live output and makes sure each one is
    /// watched for writability.
    ///
    /// Outputs already registered are re-armed rather than skipped, so one
    /// closed out of band is dropped here instead of queueing until EOF.
    fn fan_out(&mut self, registry: &mut Registry<Self>, chunk: Arc<[u8]>) -> Result<()> {
        let wanted = Interest::WRITABLE | Interest::ERROR;
        let mut invalid = Vec::new();

        for fd in self.outputs.live_fds() {
            if let Some(output) = self.outputs.live_mut(fd) {
                output.push(chunk.clone());
            }

            let armed = if registry.interest(fd) == Some(wanted) {
                registry.rearm(fd)
            } else {
                registry.register(fd, wanted, writer(false))
            };

            match armed {
                Ok(()) => {}
                Err(err) if is_gone(&err) => invalid.push(fd),
                Err(err) => return Err(TeeError::register(fd, err)),
            }
        }

        for fd in invalid {
            debug!(fd, "output descriptor is invalid, dropping it");
            self.drop_output(registry, fd);
        }

        Ok(())
    }

    /// Ends the input: flush what is queued, close what is not, close the
    /// input itself.
    fn shut_down_input(&mut self, registry: &mut Registry<Self>) -> Result<()> {
        let input = self.input;
        registry.unregister(input);
        self.restore_flags_of(input);
        if let Err(err) = close_fd(input) {
            warn!(fd = input, error = %err, "failed to close input");
        }
        self.input_state = InputState::Closed;

        for fd in self.outputs.live_fds() {
            let pending = self
                .outputs
                .get(fd)
                .map_or(0, |output| output.queued_bytes());

            if pending == 0 {
                registry.unregister(fd);
                self.close_output(fd);
                continue;
            }

            debug!(fd, pending, "draining output");
            match registry.register(fd, Interest::WRITABLE | Interest::ERROR, writer(true)) {
                Ok(()) => {}
                Err(err) if is_gone(&err) => {
                    debug!(fd, "output descriptor is invalid, dropping it");
                    self.drop_output(registry, fd);
                }
                Err(err) => return Err(TeeError::register(fd, err)),
            }
        }

        Ok(())
    }

    fn close_output(&mut self, fd: RawFd) {
        // Other holders of the same open file keep their blocking mode.
        self.restore_flags_of(fd);
        if let Err(err) = close_fd(fd) {
            warn!(fd, error = %err, "failed to close output");
        }

        self.outputs.mark_closed(fd);
        debug!(fd, "output drained and closed");
    }

    fn drop_output(&mut self, registry: &mut Registry<Self>, fd: RawFd) {
        registry.unregister(fd);
        self.restore_flags_of(fd);
        self.outputs.mark_dropped(fd);
    }

    fn restore_flags_of(&mut self, fd: RawFd) {
        let Some(flags) = self.saved_flags.remove(&fd) else {
            return;
        };

        if let Err(err) = flags.restore() {
            warn!(fd, error = %err, "failed to restore descriptor flags");
        }
    }
}

/// The descriptor was closed (or its number reused) behind the session.
fn is_gone(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EBADF | libc::ENOENT))
}

/// Callback for an output, in normal or terminating mode.
fn writer(
    terminating: bool,
) -> impl FnMut(&mut TeeState, &mut Registry<TeeState>, RawFd, Interest) -> Result<()> + Send + 'static
{
    move |state: &mut TeeState, registry: &mut Registry<TeeState>, fd: RawFd, ready: Interest| {
        state.on_output(registry, fd, ready, terminating)
    }
}

/// Callback for the input.
pub(crate) fn reader(
    state: &mut TeeState,
    registry: &mut Registry<TeeState>,
    fd: RawFd,
    ready: Interest,
) -> Result<()> {
    state.on_input(registry, fd, ready)
}
