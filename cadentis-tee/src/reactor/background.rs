//! Running a [`Reactor`] on a dedicated thread.
//!
//! The reactor (and the state it owns) moves to the new thread; the caller
//! keeps a [`Background`] guard with a [`ReactorHandle`]. Ending the scope
//! always stops and joins:
//!
//! | exit path                     | stop requested | joined | reactor returned |
//! | :---------------------------- | :------------- | :----- | :--------------- |
//! | [`Background::stop`]          | if running     | yes    | yes              |
//! | [`Background::wait`]          | no             | yes    | yes              |
//! | drop (incl. caller panic)     | if running     | yes    | no               |

use super::core::{Reactor, ReactorHandle};
use crate::error::{Result, TeeError};

use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

type Joined<S> = (Reactor<S>, Result<()>);

/// Scope guard for a reactor running on a background thread.
///
/// Dropping the guard stops the reactor if it is still running and blocks
/// until its thread has exited, so no thread outlives the scope. Buffered
/// work the reactor had not finished is abandoned.
#[must_use = "dropping the guard immediately stops the reactor"]
pub struct Background<S: Send + 'static> {
    handle: ReactorHandle,
    thread: Option<JoinHandle<Joined<S>>>,
}

impl<S: Send + 'static> Reactor<S> {
    /// Starts [`run`](Reactor::run) on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns [`TeeError::Spawn`] if the thread cannot be created.
    pub fn background(self) -> Result<Background<S>> {
        let handle = self.handle();

        let thread = thread::Builder::new()
            .name("cadentis-tee-reactor".into())
            .spawn(move || {
                let mut reactor = self;
                let result = reactor.run();
                (reactor, result)
            })
            .map_err(TeeError::Spawn)?;

        debug!("reactor started in background");

        Ok(Background {
            handle,
            thread: Some(thread),
        })
    }

    /// Runs `body` on the calling thread while the reactor runs in the
    /// background, then stops and joins it.
    ///
    /// If `body` panics, the reactor is still stopped and joined before the
    /// panic continues.
    ///
    /// # Errors
    ///
    /// Returns the reactor's error, [`TeeError::ReactorPanicked`], or
    /// [`TeeError::Spawn`].
    pub fn run_in_background<F, R>(self, body: F) -> Result<(R, Reactor<S>)>
    where
        F: FnOnce(&ReactorHandle) -> R,
    {
        let background = self.background()?;
        let output = body(background.handle());
        let reactor = background.stop()?;

        Ok((output, reactor))
    }
}

impl<S: Send + 'static> Background<S> {
    /// Handle onto the background reactor.
    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Returns `true` once the background thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the reactor if it is still running, joins its thread and
    /// returns it.
    ///
    /// # Errors
    ///
    /// Returns the error the reactor loop ended with, or
    /// [`TeeError::ReactorPanicked`].
    pub fn stop(mut self) -> Result<Reactor<S>> {
        let Some(thread) = self.thread.take() else {
            unreachable!("background thread is only taken once");
        };

        join(thread, &self.handle, true)
    }

    /// Waits for the reactor to run out of work on its own, then returns it.
    ///
    /// Blocks for as long as anything stays registered; use
    /// [`stop`](Self::stop) to cut the session short.
    ///
    /// # Errors
    ///
    /// Same as [`stop`](Self::stop).
    pub fn wait(mut self) -> Result<Reactor<S>> {
        let Some(thread) = self.thread.take() else {
            unreachable!("background thread is only taken once");
        };

        join(thread, &self.handle, false)
    }
}

impl<S: Send + 'static> Drop for Background<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if let Err(err) = join(thread, &self.handle, true) {
                warn!(error = %err, "background reactor ended with an error");
            }
        }
    }
}

fn join<S>(thread: JoinHandle<Joined<S>>, handle: &ReactorHandle, stop: bool) -> Result<Reactor<S>> {
    if stop && !thread.is_finished() {
        handle.stop();
    }

    match thread.join() {
        Ok((reactor, Ok(()))) => {
            debug!("background reactor joined");
            Ok(reactor)
        }
        Ok((_, Err(err))) => Err(err),
        Err(_) => Err(TeeError::ReactorPanicked),
    }
}
