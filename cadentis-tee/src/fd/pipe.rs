use super::descriptor::{close_fd, is_closed, set_nonblocking};
use super::unix::{sys_pipe, sys_read, sys_write};
use crate::error::{Result, TeeError};

use std::io;
use std::os::fd::RawFd;

use tracing::warn;

/// An anonymous pipe with named accessors for both ends.
///
/// Both ends are closed when the `Pipe` is dropped, or earlier through
/// [`close`](Self::close), [`close_read`](Self::close_read) and
/// [`close_write`](Self::close_write). Closing an end twice is a no-op,
/// and so is closing an end that someone else already closed.
///
/// # Examples
///
/// ```rust,ignore
/// let mut pipe = Pipe::new()?;
/// pipe.write(b"hello\n")?;
/// pipe.close_write()?;
///
/// let mut buffer = [0u8; 16];
/// let n = pipe.read(&mut buffer)?;
/// assert_eq!(&buffer[..n], b"hello\n");
/// ```
#[derive(Debug)]
pub struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,

    /// Set once this handle closed or gave away the read end.
    read_released: bool,

    /// Set once this handle closed or gave away the write end.
    write_released: bool,
}

impl Pipe {
    /// Creates a blocking pipe.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Pipe`] if `pipe(2)` fails.
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) = sys_pipe().map_err(TeeError::Pipe)?;

        Ok(Self {
            read_fd,
            write_fd,
            read_released: false,
            write_released: false,
        })
    }

    /// Creates a pipe with both ends in non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Pipe`] if `pipe(2)` fails, or
    /// [`TeeError::Configure`] if the ends cannot be made non-blocking.
    pub fn nonblocking() -> Result<Self> {
        let pipe = Self::new()?;

        set_nonblocking(pipe.read_fd)?;
        set_nonblocking(pipe.write_fd)?;

        Ok(pipe)
    }

    /// Descriptor of the read end.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Descriptor of the write end.
    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Reads from the read end.
    ///
    /// # Errors
    ///
    /// Returns the OS error of `read(2)`.
    pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        sys_read(self.read_fd, buffer)
    }

    /// Writes the whole buffer to the write end.
    ///
    /// # Errors
    ///
    /// Returns the OS error of `write(2)`, or `WriteZero` if the pipe stops
    /// accepting bytes.
    pub fn write(&self, mut buffer: &[u8]) -> io::Result<()> {
        while !buffer.is_empty() {
            match sys_write(self.write_fd, buffer) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write entire buffer",
                    ));
                }
                Ok(n) => buffer = &buffer[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Returns `true` if the read end is no longer open.
    pub fn is_read_closed(&self) -> bool {
        is_closed(self.read_fd)
    }

    /// Returns `true` if the write end is no longer open.
    pub fn is_write_closed(&self) -> bool {
        is_closed(self.write_fd)
    }

    /// Closes the read end.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Close`] if `close(2)` fails with anything but
    /// `EBADF`.
    pub fn close_read(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.read_released, true) {
            return Ok(());
        }

        close_fd(self.read_fd)
    }

    /// Closes the write end.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Close`] if `close(2)` fails with anything but
    /// `EBADF`.
    pub fn close_write(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.write_released, true) {
            return Ok(());
        }

        close_fd(self.write_fd)
    }

    /// Closes both ends.
    ///
    /// Both ends are always attempted. When both fail, the write end's error
    /// is returned and the read end's error is logged.
    ///
    /// # Errors
    ///
    /// Returns the first [`TeeError::Close`] by the rule above.
    pub fn close(&mut self) -> Result<()> {
        let read = self.close_read();
        let write = self.close_write();

        prefer_primary(write, read)
    }

    /// Gives the read end away without closing it.
    ///
    /// The pipe will no longer close this end; the new owner (typically a
    /// tee that closes its input on EOF) is responsible for it.
    pub fn take_read_fd(&mut self) -> RawFd {
        self.read_released = true;
        self.read_fd
    }

    /// Gives the write end away without closing it.
    ///
    /// See [`take_read_fd`](Self::take_read_fd).
    pub fn take_write_fd(&mut self) -> RawFd {
        self.write_released = true;
        self.write_fd
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close pipe on drop");
        }
    }
}

/// Settles two independent shutdown steps that have both been attempted.
///
/// The primary failure wins; a secondary failure is only reported as a
/// diagnostic when it would otherwise be lost.
pub(crate) fn prefer_primary(primary: Result<()>, secondary: Result<()>) -> Result<()> {
    match (primary, secondary) {
        (Ok(()), secondary) => secondary,
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(secondary)) => {
            warn!(error = %secondary, "ignored error while closing the other end");
            Err(primary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_error(fd: RawFd) -> Result<()> {
        Err(TeeError::close(fd, io::Error::from_raw_os_error(libc::EIO)))
    }

    #[test]
    fn primary_error_wins_when_both_fail() {
        let err = prefer_primary(close_error(2), close_error(1)).unwrap_err();
        assert!(matches!(err, TeeError::Close { fd: 2, .. }));
    }

    #[test]
    fn secondary_error_surfaces_alone() {
        let err = prefer_primary(Ok(()), close_error(1)).unwrap_err();
        assert!(matches!(err, TeeError::Close { fd: 1, .. }));
    }

    #[test]
    fn primary_error_surfaces_alone() {
        let err = prefer_primary(close_error(2), Ok(())).unwrap_err();
        assert!(matches!(err, TeeError::Close { fd: 2, .. }));
    }

    #[test]
    fn no_error_when_both_succeed() {
        assert!(prefer_primary(Ok(()), Ok(())).is_ok());
    }
}
