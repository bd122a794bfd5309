//! The terminal adapter.
//!
//! Raw-mode setup mostly follows what `screen`-alikes do: canonical
//! mode, echo, and signal generation off, one byte at a time with no
//! inter-byte timer. The saved attributes are restored on every exit
//! path: explicit close, drop, or Ctrl-C (which sets a flag the input
//! pump turns into an event; it never kills the process mid-raw-mode).
//!
//! Key input is pumped by a task over the non-blocking stdin fd, so the
//! single-threaded event loop never parks in a terminal read.

use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use flume::Sender;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use tracing::debug;

/// How often the input pump re-checks an empty stdin.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Set by the SIGINT handler; observed by the input pump.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

mod ioctl {
    use nix::ioctl_write_ptr_bad;
    use nix::libc;

    ioctl_write_ptr_bad!(tiocsti, libc::TIOCSTI, libc::c_char);
}

/// Events from the console pump to the client loop.
#[derive(Debug)]
pub enum ConsoleEvent {
    /// One key, with DEL already mapped to BS.
    Key(u8),
    /// SIGINT arrived or stdin went away.
    Interrupted,
}

/// The process's controlling terminal, held in raw mode.
pub struct Console {
    saved: Termios,
}

impl Console {
    /// Save the current attributes, hook SIGINT, and enter raw mode.
    pub fn new() -> io::Result<Self> {
        let saved = termios::tcgetattr(io::stdin()).map_err(io::Error::from)?;

        // Ctrl-C must not kill us while the terminal is raw; the flag is
        // drained by the input pump into a clean shutdown.
        let handler = SigHandler::Handler(on_sigint);
        // SAFETY: the handler only stores to an atomic.
        unsafe { signal::signal(Signal::SIGINT, handler) }.map_err(io::Error::from)?;

        let console = Self { saved };
        console.setup()?;
        Ok(console)
    }

    /// Enter raw mode: no canonical buffering, no echo, no signal keys,
    /// byte-at-a-time reads.
    pub fn setup(&self) -> io::Result<()> {
        let mut raw = self.saved.clone();
        raw.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw).map_err(io::Error::from)
    }

    /// Restore the saved attributes and drop to a fresh line.
    pub fn cleanup(&self) {
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &self.saved);
        self.write(b"\n");
    }

    /// Temporarily return to cooked mode; raw mode comes back when the
    /// guard drops. Used for help listings and script error reports.
    #[must_use]
    pub fn cooked(&self) -> CookedGuard<'_> {
        self.cleanup();
        CookedGuard { console: self }
    }

    /// Write bytes straight to the terminal.
    pub fn write(&self, bytes: &[u8]) {
        let mut out = io::stdout();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }

    /// Inject a NUL into the terminal input queue to unblock a pending
    /// read.
    pub fn cancel(&self) {
        let zero: nix::libc::c_char = 0;
        // SAFETY: TIOCSTI on our own controlling terminal.
        let _ = unsafe { ioctl::tiocsti(io::stdin().as_raw_fd(), &zero) };
    }

    /// Start the input pump: one `ConsoleEvent::Key` per byte typed.
    pub fn spawn_input_pump(&self, events: Sender<ConsoleEvent>) -> io::Result<()> {
        let fd = io::stdin().as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
        compio::runtime::spawn(input_pump(events)).detach();
        Ok(())
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Scoped cooked-mode bracket.
pub struct CookedGuard<'a> {
    console: &'a Console,
}

impl Drop for CookedGuard<'_> {
    fn drop(&mut self) {
        let _ = self.console.setup();
    }
}

async fn input_pump(events: Sender<ConsoleEvent>) {
    loop {
        if INTERRUPTED.swap(false, Ordering::SeqCst) {
            let _ = events.send(ConsoleEvent::Interrupted);
            break;
        }
        let mut buf = [0u8; 1];
        match nix::unistd::read(io::stdin().as_raw_fd(), &mut buf) {
            Ok(0) => {
                let _ = events.send(ConsoleEvent::Interrupted);
                break;
            }
            Ok(_) => {
                let mut key = buf[0];
                if key == 0x7f {
                    key = 0x08; // DEL reads as backspace
                }
                if events.send(ConsoleEvent::Key(key)).is_err() {
                    break;
                }
            }
            Err(nix::errno::Errno::EAGAIN) => {
                compio::time::sleep(INPUT_POLL_INTERVAL).await;
            }
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => {
                debug!(error = %e, "console read failed");
                let _ = events.send(ConsoleEvent::Interrupted);
                break;
            }
        }
    }
}

/// The terminal's clear-screen byte sequence.
///
/// Looked up from terminfo with `$<N>[/*]?` delay markers stripped;
/// falls back to the ANSI home+clear sequence when there is no usable
/// database.
#[must_use]
pub fn clear_capability() -> Bytes {
    lookup_clear().unwrap_or_else(|| Bytes::from_static(b"\x1b[H\x1b[2J"))
}

fn lookup_clear() -> Option<Bytes> {
    let db = terminfo::Database::from_env().ok()?;
    match db.raw("clear") {
        Some(terminfo::Value::String(s)) => Some(strip_delays(s)),
        _ => None,
    }
}

/// Remove terminfo delay markers of the form `$<N>` plus an optional
/// trailing `/` or `*`.
fn strip_delays(s: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        if s[i] == b'$' && i + 1 < s.len() && s[i + 1] == b'<' {
            let mut j = i + 2;
            while j < s.len() && s[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 2 && j < s.len() && s[j] == b'>' {
                j += 1;
                if j < s.len() && (s[j] == b'/' || s[j] == b'*') {
                    j += 1;
                }
                i = j;
                continue;
            }
        }
        out.push(s[i]);
        i += 1;
    }
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_markers_are_stripped() {
        assert_eq!(&strip_delays(b"\x1b[H\x1b[2J$<50>")[..], b"\x1b[H\x1b[2J");
        assert_eq!(&strip_delays(b"a$<5>*b$<12>/c")[..], b"abc");
    }

    #[test]
    fn non_markers_pass_through() {
        assert_eq!(&strip_delays(b"$<>x")[..], b"$<>x");
        assert_eq!(&strip_delays(b"$x")[..], b"$x");
        assert_eq!(&strip_delays(b"plain")[..], b"plain");
    }
}
