mod common;

use cadentis_tee::{Interest, Pipe, Reactor, Registry, TeeError};
use common::serial;

use pretty_assertions::assert_eq;
use std::io;
use std::os::fd::RawFd;

fn collect(
    seen: &mut Vec<u8>,
    registry: &mut Registry<Vec<u8>>,
    fd: RawFd,
    _ready: Interest,
) -> cadentis_tee::Result<()> {
    let mut buffer = [0u8; 4096];
    let n = unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };

    match n {
        0 => registry.unregister(fd),
        n if n > 0 => seen.extend_from_slice(&buffer[..n as usize]),
        _ => {
            return Err(TeeError::Read {
                fd,
                source: io::Error::last_os_error(),
            });
        }
    }

    Ok(())
}

#[test]
fn test_background_reactor_collects_messages() {
    let _serial = serial();
    let mut pipe = Pipe::new().unwrap();

    let mut reactor = Reactor::new(Vec::new()).unwrap();
    reactor
        .register(pipe.read_fd(), Interest::READABLE, collect)
        .unwrap();

    let session = reactor.background().unwrap();
    assert!(!session.is_finished());

    pipe.write(b"Message 1\n").unwrap();
    pipe.write(b"Message 2\n").unwrap();
    pipe.close_write().unwrap();

    let reactor = session.wait().unwrap();
    assert_eq!(reactor.state().as_slice(), b"Message 1\nMessage 2\n");
    assert!(reactor.registry().is_empty());
}

#[test]
fn test_stop_interrupts_an_idle_reactor() {
    let _serial = serial();
    let pipe = Pipe::new().unwrap();

    let mut reactor = Reactor::new(Vec::new()).unwrap();
    reactor
        .register(pipe.read_fd(), Interest::READABLE, collect)
        .unwrap();

    let session = reactor.background().unwrap();
    let handle = session.handle().clone();

    let reactor = session.stop().unwrap();
    assert!(!handle.is_running());
    assert!(reactor.registry().is_registered(pipe.read_fd()));
    assert!(reactor.state().is_empty());
}

#[test]
fn test_stop_requested_before_start_is_honored() {
    let _serial = serial();
    let pipe = Pipe::new().unwrap();

    let mut reactor = Reactor::new(Vec::new()).unwrap();
    reactor
        .register(pipe.read_fd(), Interest::READABLE, collect)
        .unwrap();
    reactor.handle().stop();

    // Would block forever if the early stop were lost.
    let reactor = reactor.background().unwrap().wait().unwrap();
    assert_eq!(reactor.registry().len(), 1);
}

#[test]
fn test_callback_error_ends_the_session() {
    let _serial = serial();
    let pipe = Pipe::new().unwrap();

    let mut reactor = Reactor::new(()).unwrap();
    reactor
        .register(pipe.read_fd(), Interest::READABLE, |_: &mut (), _: &mut Registry<()>, fd, _| {
            Err(TeeError::InvalidDescriptor { fd })
        })
        .unwrap();

    let session = reactor.background().unwrap();
    pipe.write(b"boom").unwrap();

    let err = session.wait().unwrap_err();
    assert!(matches!(err, TeeError::InvalidDescriptor { fd } if fd == pipe.read_fd()));
}

#[test]
fn test_panicking_callback_is_reported() {
    let _serial = serial();
    let pipe = Pipe::new().unwrap();

    let mut reactor = Reactor::new(()).unwrap();
    reactor
        .register(pipe.read_fd(), Interest::READABLE, |_: &mut (), _: &mut Registry<()>, _, _| {
            panic!("callback failed")
        })
        .unwrap();

    let session = reactor.background().unwrap();
    let handle = session.handle().clone();
    pipe.write(b"boom").unwrap();

    let err = session.wait().unwrap_err();
    assert!(matches!(err, TeeError::ReactorPanicked));
    assert!(!handle.is_running());
}
