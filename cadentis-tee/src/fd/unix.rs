//! Thin wrappers over the descriptor syscalls used by the engine.
//!
//! Every function maps a negative return value to
//! [`io::Error::last_os_error`]; interpreting the errno is left to
//! [`errno::classify`](super::errno::classify).

use libc::{F_GETFD, F_GETFL, F_SETFL, O_NONBLOCK, c_int, close, fcntl, isatty, pipe, read, write};
use std::io;
use std::os::fd::RawFd;

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read; `0` means end of stream.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(n as usize)
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes accepted, which may be less than
/// `buffer.len()` on a non-blocking descriptor.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    let n = unsafe { write(fd, buffer.as_ptr().cast(), buffer.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(n as usize)
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { close(fd) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Returns the file status flags (`F_GETFL`) of a descriptor.
pub(crate) fn sys_get_flags(fd: RawFd) -> io::Result<c_int> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(flags)
}

/// Replaces the file status flags (`F_SETFL`) of a descriptor.
pub(crate) fn sys_set_flags(fd: RawFd, flags: c_int) -> io::Result<()> {
    let rc = unsafe { fcntl(fd, F_SETFL, flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Sets or clears `O_NONBLOCK` on a file descriptor.
pub(crate) fn sys_set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = sys_get_flags(fd)?;

    let flags = if nonblocking {
        flags | O_NONBLOCK
    } else {
        flags & !O_NONBLOCK
    };

    sys_set_flags(fd, flags)
}

/// Creates an anonymous pipe, returning `(read_end, write_end)`.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [-1; 2];

    let rc = unsafe { pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((fds[0], fds[1]))
}

/// Returns `true` if the descriptor refers to a terminal.
pub(crate) fn sys_isatty(fd: RawFd) -> bool {
    unsafe { isatty(fd) == 1 }
}

/// Checks that a descriptor is open, without touching its state.
pub(crate) fn sys_check_fd(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { fcntl(fd, F_GETFD) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
