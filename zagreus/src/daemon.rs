//! Daemonization and PID-file plumbing for `zagreusd`.
//!
//! Classic double fork: detach from the launching shell, become a
//! session leader, fork again so the daemon can never reacquire a
//! controlling terminal, then point stdio at /dev/null. Must run before
//! the async runtime starts; forking an active io_uring is not a thing.

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::unistd::{dup2, fork, setsid, ForkResult};

/// Detach into the background and write `pid_file`.
pub fn daemonize(pid_file: &Path) -> io::Result<()> {
    // SAFETY: called from main before any threads or runtime exist.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(io::Error::from)?;

    // SAFETY: as above; still single-threaded.
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    write_pid_file(pid_file)?;
    redirect_stdio()
}

/// Record our PID; also used in foreground mode.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    fs::write(path, format!("{}\n", std::process::id()))
}

fn redirect_stdio() -> io::Result<()> {
    let devnull = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd).map_err(io::Error::from)?;
    }
    Ok(())
}
