//! Descriptor utilities used around the tee engine.
//!
//! - `descriptor`: coercion to raw descriptors, tolerant close
//! - [`errno`]: the retry / teardown / propagate table
//! - [`Pipe`]: an anonymous pipe that closes itself deterministically

mod descriptor;
mod pipe;

pub mod errno;
pub(crate) mod unix;

pub(crate) use descriptor::{SavedFlags, enter_nonblocking};
pub use descriptor::{
    AsDescriptor, close_fd, ensure_fd, is_closed, is_nonblocking, set_nonblocking,
};
pub use pipe::Pipe;
