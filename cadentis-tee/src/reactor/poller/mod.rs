//! Platform-specific readiness poller.
//!
//! The concrete implementation is selected at compile time:
//! - Linux: `epoll`
//! - other Unix targets: `poll(2)`
//!
//! Both expose the same inherent API (`new`, `waker`, `register`,
//! `reregister`, `deregister`, `poll`), which is all the registry uses.

pub(crate) mod common;

pub(crate) use common::Waker;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(all(unix, not(target_os = "linux")))]
mod poll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) type Poller = poll::PollPoller;
