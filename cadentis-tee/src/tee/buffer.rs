//! Per-output FIFO queues.
//!
//! A chunk read from the input is stored once (`Arc<[u8]>`) and queued on
//! every live output. Each queue entry carries its own offset, so a partial
//! write only advances that output's view of the chunk: the unwritten
//! remainder stays at the front of the queue for the next writable event.

use crate::fd::errno::{ErrorClass, Side, classify_io};

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Lifecycle of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Receiving data.
    Live,
    /// Drained after the input ended and closed by the session.
    Closed,
    /// Removed after an error; its descriptor was left as is.
    Dropped,
}

#[derive(Debug)]
struct Chunk {
    data: Arc<[u8]>,
    offset: usize,
}

impl Chunk {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// Result of one write attempt on the front of a queue.
#[derive(Debug)]
pub(crate) enum Flush {
    /// Nothing was queued.
    Idle,
    /// This many bytes were accepted (possibly fewer than the chunk).
    Wrote(usize),
    /// Transient errors persisted past the retry bound, or the descriptor
    /// accepted nothing; try again on the next writable event.
    Blocked,
    /// The output is gone.
    Terminal(io::Error),
    /// Unclassified error, to be propagated.
    Fatal(io::Error),
}

/// The queue and bookkeeping for one output.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    chunks: VecDeque<Chunk>,
    queued: usize,
    written: u64,
    state: OutputState,
}

impl OutputBuffer {
    pub(crate) fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            queued: 0,
            written: 0,
            state: OutputState::Live,
        }
    }

    pub(crate) fn push(&mut self, data: Arc<[u8]>) {
        if data.is_empty() {
            return;
        }

        self.queued += data.len();
        self.chunks.push_back(Chunk { data, offset: 0 });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn queued_bytes(&self) -> usize {
        self.queued
    }

    pub(crate) fn written_bytes(&self) -> u64 {
        self.written
    }

    pub(crate) fn state(&self) -> OutputState {
        self.state
    }

    /// Writes as much of the oldest chunk as `write` accepts.
    ///
    /// Transient errors are retried up to `retries` extra times before
    /// giving up with [`Flush::Blocked`].
    pub(crate) fn flush_front<W>(&mut self, retries: usize, mut write: W) -> Flush
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        let Some(front) = self.chunks.front_mut() else {
            return Flush::Idle;
        };

        let mut attempts = 0;
        loop {
            match write(front.remaining()) {
                Ok(0) => return Flush::Blocked,
                Ok(n) => {
                    let n = n.min(front.remaining().len());
                    front.offset += n;
                    if front.offset == front.data.len() {
                        self.chunks.pop_front();
                    }

                    self.queued -= n;
                    self.written += n as u64;
                    return Flush::Wrote(n);
                }
                Err(err) => match classify_io(Side::Write, &err) {
                    ErrorClass::Transient if attempts < retries => attempts += 1,
                    ErrorClass::Transient => return Flush::Blocked,
                    ErrorClass::Terminal => return Flush::Terminal(err),
                    ErrorClass::Fatal => return Flush::Fatal(err),
                },
            }
        }
    }

    fn finish(&mut self, state: OutputState) {
        self.chunks.clear();
        self.queued = 0;
        self.state = state;
    }
}

/// All outputs of a session, keyed by descriptor.
#[derive(Debug, Default)]
pub(crate) struct BufferStore {
    outputs: BTreeMap<RawFd, OutputBuffer>,
}

impl BufferStore {
    /// Builds a store with one live output per distinct descriptor.
    pub(crate) fn new<I>(fds: I) -> Self
    where
        I: IntoIterator<Item = RawFd>,
    {
        let outputs = fds.into_iter().map(|fd| (fd, OutputBuffer::new())).collect();
        Self { outputs }
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<&OutputBuffer> {
        self.outputs.get(&fd)
    }

    /// The output for `fd`, only if it is still live.
    pub(crate) fn live_mut(&mut self, fd: RawFd) -> Option<&mut OutputBuffer> {
        self.outputs
            .get_mut(&fd)
            .filter(|output| output.state == OutputState::Live)
    }

    /// Descriptors of the live outputs, in ascending order.
    pub(crate) fn live_fds(&self) -> Vec<RawFd> {
        self.outputs
            .iter()
            .filter(|(_, output)| output.state == OutputState::Live)
            .map(|(&fd, _)| fd)
            .collect()
    }

    pub(crate) fn has_live(&self) -> bool {
        self.outputs
            .values()
            .any(|output| output.state == OutputState::Live)
    }

    /// Marks a live output closed. Its queue is expected to be empty.
    pub(crate) fn mark_closed(&mut self, fd: RawFd) {
        if let Some(output) = self.live_mut(fd) {
            output.finish(OutputState::Closed);
        }
    }

    /// Marks a live output dropped and discards whatever it still queued.
    pub(crate) fn mark_dropped(&mut self, fd: RawFd) {
        if let Some(output) = self.live_mut(fd) {
            output.finish(OutputState::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn chunk(bytes: &[u8]) -> Arc<[u8]> {
        Arc::from(bytes)
    }

    #[test]
    fn partial_write_keeps_the_remainder_in_front() {
        let mut output = OutputBuffer::new();
        output.push(chunk(b"foobar"));

        let mut sink = Vec::new();
        let flush = output.flush_front(0, |bytes| {
            sink.extend_from_slice(&bytes[..3]);
            Ok(3)
        });

        assert!(matches!(flush, Flush::Wrote(3)));
        assert_eq!(output.queued_bytes(), 3);
        assert!(!output.is_empty());

        let flush = output.flush_front(0, |bytes| {
            sink.extend_from_slice(bytes);
            Ok(bytes.len())
        });

        assert!(matches!(flush, Flush::Wrote(3)));
        assert_eq!(sink, b"foobar");
        assert_eq!(output.written_bytes(), 6);
        assert!(output.is_empty());
        assert!(matches!(output.flush_front(0, |_| Ok(0)), Flush::Idle));
    }

    #[test]
    fn chunks_leave_in_arrival_order() {
        let mut output = OutputBuffer::new();
        output.push(chunk(b"one "));
        output.push(chunk(b""));
        output.push(chunk(b"two"));

        let mut sink = Vec::new();
        while let Flush::Wrote(_) = output.flush_front(0, |bytes| {
            sink.extend_from_slice(bytes);
            Ok(bytes.len())
        }) {}

        assert_eq!(sink, b"one two");
    }

    #[test]
    fn transient_errors_are_retried_up_to_the_bound() {
        let mut output = OutputBuffer::new();
        output.push(chunk(b"abc"));

        let mut calls = 0;
        let flush = output.flush_front(2, |bytes| {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from_raw_os_error(libc::EINTR))
            } else {
                Ok(bytes.len())
            }
        });
        assert!(matches!(flush, Flush::Wrote(3)));
        assert_eq!(calls, 3);

        output.push(chunk(b"def"));
        let mut calls = 0;
        let flush = output.flush_front(2, |_| {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::EAGAIN))
        });
        assert!(matches!(flush, Flush::Blocked));
        assert_eq!(calls, 3);
        assert_eq!(output.queued_bytes(), 3);
    }

    #[test]
    fn write_errors_are_classified() {
        let mut output = OutputBuffer::new();
        output.push(chunk(b"abc"));

        let flush = output.flush_front(0, |_| Err(io::Error::from_raw_os_error(libc::EPIPE)));
        assert!(matches!(flush, Flush::Terminal(_)));

        let flush = output.flush_front(0, |_| Err(io::Error::from_raw_os_error(libc::ENOSPC)));
        assert!(matches!(flush, Flush::Fatal(_)));
        assert_eq!(output.queued_bytes(), 3);
    }

    #[test]
    fn store_tracks_liveness() {
        let mut store = BufferStore::new([4, 5, 6, 5]);
        assert_eq!(store.live_fds(), vec![4, 5, 6]);

        store.live_mut(4).unwrap().push(chunk(b"pending"));
        store.mark_dropped(4);
        store.mark_closed(6);

        assert_eq!(store.live_fds(), vec![5]);
        assert_eq!(store.get(4).unwrap().state(), OutputState::Dropped);
        assert_eq!(store.get(4).unwrap().queued_bytes(), 0);
        assert_eq!(store.get(6).unwrap().state(), OutputState::Closed);
        assert!(store.live_mut(6).is_none());
        assert!(store.has_live());

        store.mark_dropped(5);
        assert!(!store.has_live());
    }

    proptest! {
        #[test]
        fn output_sees_input_in_order_despite_partial_writes(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..32),
            accepts in prop::collection::vec(1usize..16, 1..64),
        ) {
            let mut output = OutputBuffer::new();
            for bytes in &chunks {
                output.push(Arc::from(bytes.as_slice()));
            }

            let mut sink = Vec::new();
            let mut turn = 0;
            loop {
                let limit = accepts[turn % accepts.len()];
                turn += 1;

                let flush = output.flush_front(0, |bytes| {
                    let n = bytes.len().min(limit);
                    sink.extend_from_slice(&bytes[..n]);
                    Ok(n)
                });

                if matches!(flush, Flush::Idle) {
                    break;
                }
            }

            let expected: Vec<u8> = chunks.concat();
            prop_assert_eq!(sink, expected);
            prop_assert_eq!(output.queued_bytes(), 0);
        }
    }
}
