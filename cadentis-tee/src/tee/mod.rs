//! Fan-out copy from one input descriptor to many outputs.
//!
//! A session is a [`Reactor`] owning a [`TeeState`]:
//!
//! 1. Only the input is registered at first (READABLE | ERROR).
//! 2. Each read is queued on every live output, and those outputs are
//!    registered for WRITABLE | ERROR.
//! 3. Each writable event writes the oldest queued chunk to that output;
//!    an output with nothing queued is unregistered until the next read.
//! 4. On input EOF or failure the input is closed, outputs with nothing
//!    queued are closed at once, and the others are closed as soon as
//!    their queue drains.
//!
//! The reactor returns from `run` when nothing is left registered.
//!
//! A failing output is dropped on its own; the other outputs keep going.
//! When every output is gone the input is left open and unregistered.
//!
//! # Examples
//!
//! ```rust,ignore
//! use cadentis_tee::{Pipe, tee};
//!
//! let mut input = Pipe::new()?;
//! let mut output = Pipe::new()?;
//! let stdout = std::io::stdout();
//!
//! // Terminals are never closed, so stdout survives the session.
//! let session = tee(input.take_read_fd(), [output.take_write_fd(), stdout.as_raw_fd()])?
//!     .background()?;
//! input.write(b"FooBar\n")?;
//! input.close_write()?;
//! let tee = session.wait()?;
//! ```

mod buffer;
mod builder;
mod engine;

pub use buffer::OutputState;
pub use builder::{DEFAULT_BUFFER_SIZE, DEFAULT_TRANSIENT_RETRIES, TeeBuilder};
pub use engine::{InputState, TeeState};

use crate::error::Result;
use crate::fd::AsDescriptor;
use crate::reactor::Reactor;

/// A tee session: a reactor whose state is the session.
pub type Tee = Reactor<TeeState>;

/// Creates a tee session with the default configuration.
///
/// Shorthand for `TeeBuilder::new().build(input, outputs)`; see
/// [`TeeBuilder::build`] for the errors.
///
/// # Errors
///
/// See [`TeeBuilder::build`].
pub fn tee<I, O, D>(input: I, outputs: O) -> Result<Tee>
where
    I: AsDescriptor,
    O: IntoIterator<Item = D>,
    D: AsDescriptor,
{
    TeeBuilder::new().build(input, outputs)
}
