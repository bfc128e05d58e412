//! Classification of OS error numbers into retry / teardown / propagate.
//!
//! The engine never matches on `io::ErrorKind` directly; every failed
//! `read(2)` or `write(2)` goes through [`classify`] so the table below is
//! the single place that decides what happens to an endpoint.
//!
//! | errno                           | read side   | write side  |
//! | :------------------------------ | :---------- | :---------- |
//! | `EINTR`, `EAGAIN`/`EWOULDBLOCK` | `Transient` | `Transient` |
//! | `EPIPE`, `ECONNRESET`, `EIO`    | `Terminal`  | `Terminal`  |
//! | `EBADF`                         | `Fatal`     | `Terminal`  |
//! | anything else                   | `Fatal`     | `Fatal`     |

use std::io;

/// Which syscall produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// `read(2)` on the input.
    Read,
    /// `write(2)` on an output.
    Write,
}

/// What the engine does with a failed syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry immediately within the same callback.
    Transient,
    /// Tear down this endpoint only; never reported to the caller.
    Terminal,
    /// Propagate to the caller.
    Fatal,
}

/// Classifies a raw errno for the given side.
pub fn classify(side: Side, errno: i32) -> ErrorClass {
    match errno {
        libc::EINTR => ErrorClass::Transient,
        e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => ErrorClass::Transient,
        libc::EPIPE | libc::ECONNRESET | libc::EIO => ErrorClass::Terminal,
        libc::EBADF if side == Side::Write => ErrorClass::Terminal,
        _ => ErrorClass::Fatal,
    }
}

/// Classifies an `io::Error`.
///
/// Errors that carry no errno (synthesized by std) are fatal.
pub fn classify_io(side: Side, error: &io::Error) -> ErrorClass {
    error
        .raw_os_error()
        .map_or(ErrorClass::Fatal, |errno| classify(side, errno))
}
