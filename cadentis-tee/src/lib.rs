//! # cadentis-tee
//!
//! Copies a stream of bytes from one input descriptor to any number of
//! output descriptors at once, the way `tee(1)` does, without a thread per
//! descriptor: one readiness reactor (epoll on Linux, `poll(2)` elsewhere)
//! services every descriptor from a single background thread.
//!
//! - Each output has its own queue, so a slow output never holds back a
//!   fast one and bytes reach every output in input order.
//! - An output that fails is dropped on its own; the rest keep going.
//! - When the input ends, queued bytes are flushed and each output is
//!   closed, after which the reactor exits on its own.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadentis_tee::{Pipe, tee};
//!
//! let mut input = Pipe::new()?;
//! let mut left = Pipe::new()?;
//! let mut right = Pipe::new()?;
//!
//! // The session closes the descriptors it is handed once the input ends.
//! let session = tee(input.take_read_fd(), [left.take_write_fd(), right.take_write_fd()])?
//!     .background()?;
//!
//! input.write(b"foobar")?;
//! input.close_write()?;
//!
//! let mut buffer = [0u8; 6];
//! left.read(&mut buffer)?;
//! assert_eq!(&buffer, b"foobar");
//!
//! session.wait()?;
//! ```
//!
//! ## Modules
//!
//! - [`tee`]: the fan-out engine and its builder
//! - [`reactor`]: the readiness reactor and its background runner
//! - [`fd`]: descriptor utilities, errno classification, [`Pipe`]

#[cfg(not(unix))]
compile_error!("cadentis-tee only supports Unix targets");

mod error;

pub mod fd;
pub mod reactor;
pub mod tee;

pub use error::{Result, TeeError};
pub use fd::{AsDescriptor, Pipe};
pub use reactor::{Background, Interest, Reactor, ReactorHandle, Registry};
pub use tee::{
    DEFAULT_BUFFER_SIZE, InputState, OutputState, Tee, TeeBuilder, TeeState, tee,
};
