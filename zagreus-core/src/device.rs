//! The serial+reset device abstraction.
//!
//! A [`DeviceLink`] is the board on the other end of the serial line: a
//! byte pipe plus a reset wire. The server never touches hardware
//! directly; it drives whatever link it is given, which keeps the event
//! loop testable against [`LoopbackLink`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;

/// The board behind the serial line.
///
/// `read` is non-blocking: it returns whatever bytes are pending, up to
/// `max`, possibly none. `write` is best-effort and may block briefly.
/// `reset` pulses the reset wire and does not return until the pulse is
/// complete, so pulses never interleave.
#[async_trait(?Send)]
pub trait DeviceLink {
    /// Read up to `max` pending bytes. An empty result means no data.
    async fn read(&mut self, max: usize) -> io::Result<Bytes>;

    /// Write `data` to the board.
    async fn write(&mut self, data: Bytes) -> io::Result<()>;

    /// Pulse the reset line: assert, hold, deassert.
    async fn reset(&mut self) -> io::Result<()>;
}

#[derive(Debug, Default)]
struct LoopbackState {
    /// Bytes the device will hand out on the next reads.
    pending: VecDeque<u8>,
    /// Everything ever written to the device.
    written: Vec<u8>,
    resets: usize,
    /// When set, writes are also fed back into `pending`.
    echo: bool,
    fail: bool,
}

/// An in-memory [`DeviceLink`] for tests and local experiments.
///
/// Output is injected through the paired [`LoopbackHandle`]; writes and
/// reset pulses are recorded there. With echo enabled, every written
/// byte also comes back out of `read`, like a board running a serial
/// echo loop.
pub struct LoopbackLink {
    state: Rc<RefCell<LoopbackState>>,
}

/// Inspection/injection handle for a [`LoopbackLink`].
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Rc<RefCell<LoopbackState>>,
}

impl LoopbackLink {
    /// Create a silent link: reads return only injected bytes.
    #[must_use]
    pub fn new() -> (Self, LoopbackHandle) {
        let state = Rc::new(RefCell::new(LoopbackState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            LoopbackHandle { state },
        )
    }

    /// Create an echoing link: every written byte is also readable back.
    #[must_use]
    pub fn echo() -> (Self, LoopbackHandle) {
        let (link, handle) = Self::new();
        link.state.borrow_mut().echo = true;
        (link, handle)
    }
}

#[async_trait(?Send)]
impl DeviceLink for LoopbackLink {
    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        let take = state.pending.len().min(max);
        let out: Vec<u8> = state.pending.drain(..take).collect();
        Ok(out.into())
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        state.written.extend_from_slice(&data);
        if state.echo {
            state.pending.extend(data.iter().copied());
        }
        Ok(())
    }

    async fn reset(&mut self) -> io::Result<()> {
        self.state.borrow_mut().resets += 1;
        Ok(())
    }
}

impl LoopbackHandle {
    /// Queue bytes for the server to read as device output.
    pub fn push_output(&self, data: &[u8]) {
        self.state.borrow_mut().pending.extend(data.iter().copied());
    }

    /// Everything written to the device so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    /// Number of reset pulses seen.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.state.borrow().resets
    }

    /// Make every subsequent read and write fail.
    pub fn fail(&self) {
        self.state.borrow_mut().fail = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn loopback_round_trip() {
        let (mut link, handle) = LoopbackLink::new();
        handle.push_output(b"hello");
        assert_eq!(&link.read(3).await.unwrap()[..], b"hel");
        assert_eq!(&link.read(16).await.unwrap()[..], b"lo");
        assert!(link.read(16).await.unwrap().is_empty());

        link.write(Bytes::from_static(b"go")).await.unwrap();
        assert_eq!(handle.written(), b"go");
    }

    #[compio::test]
    async fn echo_link_reads_back_writes() {
        let (mut link, _handle) = LoopbackLink::echo();
        link.write(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(&link.read(16).await.unwrap()[..], b"ping");
    }

    #[compio::test]
    async fn resets_are_counted() {
        let (mut link, handle) = LoopbackLink::new();
        link.reset().await.unwrap();
        link.reset().await.unwrap();
        assert_eq!(handle.resets(), 2);
    }
}
