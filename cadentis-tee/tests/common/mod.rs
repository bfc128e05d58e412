#![allow(dead_code)]

use cadentis_tee::Pipe;

use std::io;
use std::sync::{Mutex, MutexGuard};

static FD_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests in one binary that open and close descriptors.
///
/// Several tests close descriptors out from under a `Pipe`; without this a
/// concurrently running test could be handed the same number in between.
pub fn serial() -> MutexGuard<'static, ()> {
    FD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reads exactly `n` bytes from the pipe, or fewer if it reaches EOF.
pub fn read_exact(pipe: &Pipe, n: usize) -> Vec<u8> {
    let mut data = vec![0u8; n];
    let mut filled = 0;

    while filled < n {
        match pipe.read(&mut data[filled..]) {
            Ok(0) => break,
            Ok(k) => filled += k,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => panic!("read failed: {err}"),
        }
    }

    data.truncate(filled);
    data
}

/// Reads until EOF.
pub fn read_to_end(pipe: &Pipe) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buffer = [0u8; 8192];

    loop {
        match pipe.read(&mut buffer) {
            Ok(0) => return data,
            Ok(n) => data.extend_from_slice(&buffer[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => panic!("read failed: {err}"),
        }
    }
}
