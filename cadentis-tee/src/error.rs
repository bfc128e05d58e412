//! Error types for the tee engine and its reactor.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, TeeError>;

/// Errors surfaced to the caller.
///
/// Only the fatal tier ends up here. Transient conditions are retried inside
/// the reactor callbacks and terminal-for-endpoint conditions tear down the
/// affected descriptor without being reported.
#[derive(Debug, Error)]
pub enum TeeError {
    /// A value could not be resolved to a usable descriptor.
    #[error("invalid file descriptor {fd}")]
    InvalidDescriptor {
        /// The rejected descriptor.
        fd: RawFd,
    },

    /// The buffer size handed to the engine was zero.
    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,

    /// The OS poller (epoll / poll) or its waker could not be created.
    #[error("failed to create the reactor poller")]
    PollerCreation(#[source] io::Error),

    /// Registering interest for a descriptor failed.
    #[error("failed to register descriptor {fd} with the reactor")]
    Register {
        /// Descriptor being registered.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Waiting for readiness failed with a non-retryable error.
    #[error("reactor poll failed")]
    Poll(#[source] io::Error),

    /// A read on the input failed with an unclassified error.
    #[error("fatal read error on input descriptor {fd}")]
    Read {
        /// Input descriptor.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A write on an output failed with an unclassified error.
    #[error("fatal write error on output descriptor {fd}")]
    Write {
        /// Output descriptor.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Changing descriptor flags (e.g. `O_NONBLOCK`) failed.
    #[error("failed to configure descriptor {fd}")]
    Configure {
        /// Descriptor being configured.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Closing a descriptor failed with something other than `EBADF`.
    #[error("failed to close descriptor {fd}")]
    Close {
        /// Descriptor being closed.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `pipe(2)` failed.
    #[error("failed to create pipe")]
    Pipe(#[source] io::Error),

    /// The background reactor thread could not be spawned.
    #[error("failed to spawn the reactor thread")]
    Spawn(#[source] io::Error),

    /// The background reactor thread panicked.
    #[error("reactor thread panicked")]
    ReactorPanicked,
}

impl TeeError {
    /// Create a `Register` error.
    #[inline]
    pub fn register(fd: RawFd, source: io::Error) -> Self {
        Self::Register { fd, source }
    }

    /// Create a `Close` error.
    #[inline]
    pub fn close(fd: RawFd, source: io::Error) -> Self {
        Self::Close { fd, source }
    }

    /// Returns the OS error number carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::PollerCreation(source)
            | Self::Poll(source)
            | Self::Pipe(source)
            | Self::Spawn(source)
            | Self::Register { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Configure { source, .. }
            | Self::Close { source, .. } => source.raw_os_error(),
            Self::InvalidDescriptor { .. } | Self::ZeroBufferSize | Self::ReactorPanicked => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_descriptor_error() {
        let err = TeeError::InvalidDescriptor { fd: -1 };
        assert!(err.to_string().contains("-1"));
        assert!(err.raw_os_error().is_none());
    }

    #[test]
    fn test_register_error_keeps_errno() {
        let err = TeeError::register(7, io::Error::from_raw_os_error(libc::EBADF));
        assert!(err.to_string().contains("descriptor 7"));
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_close_error_has_source() {
        use std::error::Error as _;

        let err = TeeError::close(3, io::Error::from_raw_os_error(libc::EIO));
        assert!(err.source().is_some());
    }
}
