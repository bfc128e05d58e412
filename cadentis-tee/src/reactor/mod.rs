//! Readiness reactor and its background runner.
//!
//! The reactor is a single-threaded dispatcher over a set of descriptors,
//! each registered with an [`Interest`] mask and a callback. It is
//! responsible for:
//! - waiting for readiness through the platform poller,
//! - dispatching callbacks with the conditions that hold,
//! - stopping on request from another thread.
//!
//! [`Background`] runs it on a dedicated thread so the caller can keep
//! writing synchronous code while descriptors are serviced.

mod background;
mod core;
mod event;
mod interest;
mod poller;

pub use background::Background;
pub use self::core::{Callback, Reactor, ReactorHandle, Registry};
pub use interest::Interest;
