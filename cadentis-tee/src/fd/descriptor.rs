use super::unix::{
    sys_check_fd, sys_close, sys_get_flags, sys_isatty, sys_set_flags, sys_set_nonblocking,
};
use crate::error::{Result, TeeError};

use libc::{O_NONBLOCK, c_int};
use std::os::fd::{AsRawFd, RawFd};

/// Anything that can be resolved to a raw descriptor.
///
/// Implemented for raw descriptors and for references to any type exposing
/// [`AsRawFd`] (`&File`, `&Stdout`, `&OwnedFd`, ...), so the tee accepts
/// both forms:
///
/// ```rust,ignore
/// let stdout = std::io::stdout();
/// let tee = cadentis_tee::tee(pipe.read_fd(), [&stdout])?;
/// ```
pub trait AsDescriptor {
    /// Returns the raw descriptor.
    fn as_descriptor(&self) -> RawFd;
}

impl AsDescriptor for RawFd {
    fn as_descriptor(&self) -> RawFd {
        *self
    }
}

impl<T: AsRawFd + ?Sized> AsDescriptor for &T {
    fn as_descriptor(&self) -> RawFd {
        self.as_raw_fd()
    }
}

/// Resolves a value to a raw descriptor.
///
/// # Errors
///
/// Returns [`TeeError::InvalidDescriptor`] for negative descriptors.
pub fn ensure_fd<D: AsDescriptor>(descriptor: D) -> Result<RawFd> {
    let fd = descriptor.as_descriptor();
    if fd < 0 {
        return Err(TeeError::InvalidDescriptor { fd });
    }

    Ok(fd)
}

/// Closes a descriptor, ignoring `EBADF`.
///
/// Terminals are left open: closing a live console on behalf of the caller
/// is never what a tee wants.
///
/// # Errors
///
/// Returns [`TeeError::Close`] for any other `close(2)` failure.
pub fn close_fd(fd: RawFd) -> Result<()> {
    if sys_isatty(fd) {
        return Ok(());
    }

    match sys_close(fd) {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::EBADF) => Ok(()),
        Err(err) => Err(TeeError::close(fd, err)),
    }
}

/// Returns `true` if the descriptor is not open.
pub fn is_closed(fd: RawFd) -> bool {
    matches!(sys_check_fd(fd), Err(err) if err.raw_os_error() == Some(libc::EBADF))
}

/// Puts a descriptor in non-blocking mode.
///
/// # Errors
///
/// Returns [`TeeError::Configure`] if `fcntl(2)` fails.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    sys_set_nonblocking(fd, true).map_err(|source| TeeError::Configure { fd, source })
}

/// Returns `true` if `O_NONBLOCK` is set on the descriptor.
///
/// # Errors
///
/// Returns [`TeeError::Configure`] if `fcntl(2)` fails.
pub fn is_nonblocking(fd: RawFd) -> Result<bool> {
    let flags = sys_get_flags(fd).map_err(|source| TeeError::Configure { fd, source })?;
    Ok(flags & O_NONBLOCK != 0)
}

/// File status flags a descriptor had before it was switched to
/// non-blocking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SavedFlags {
    fd: RawFd,
    flags: c_int,
}

impl SavedFlags {
    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Puts the flags back. A descriptor closed meanwhile is left alone.
    pub(crate) fn restore(self) -> Result<()> {
        match sys_set_flags(self.fd, self.flags) {
            Err(err) if err.raw_os_error() != Some(libc::EBADF) => Err(TeeError::Configure {
                fd: self.fd,
                source: err,
            }),
            _ => Ok(()),
        }
    }
}

/// Sets `O_NONBLOCK` on `fd`, returning the flags to restore later, or
/// `None` when it was already non-blocking.
pub(crate) fn enter_nonblocking(fd: RawFd) -> Result<Option<SavedFlags>> {
    let configure = |source| TeeError::Configure { fd, source };

    let flags = sys_get_flags(fd).map_err(configure)?;
    if flags & O_NONBLOCK != 0 {
        return Ok(None);
    }

    sys_set_flags(fd, flags | O_NONBLOCK).map_err(configure)?;
    Ok(Some(SavedFlags { fd, flags }))
}
