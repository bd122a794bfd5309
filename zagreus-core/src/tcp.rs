//! TCP and raw-socket utilities.
//!
//! # Safety
//!
//! This module uses unsafe code to access raw file descriptors for
//! socket configuration. The unsafe operations are encapsulated and safe
//! to use from the public API.

#![allow(unsafe_code)]

use std::io;
use std::net::SocketAddr;

/// Bind a TCP listener with `SO_REUSEADDR` set before the bind.
///
/// The server is restarted often while fiddling with the board; reuse
/// lets it rebind the port while old connections sit in TIME_WAIT.
///
/// # Errors
///
/// Returns an error if the socket cannot be created, configured, or
/// bound.
pub fn bind_reuse(addr: SocketAddr) -> io::Result<compio::net::TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&addr.into())?;
    sock.listen(16)?;

    let std_listener: std::net::TcpListener = sock.into();
    std_listener.set_nonblocking(true)?;

    #[cfg(unix)]
    {
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        // SAFETY: the fd comes straight out of a listener we own and is
        // transferred, not shared.
        Ok(unsafe { compio::net::TcpListener::from_raw_fd(std_listener.into_raw_fd()) })
    }

    #[cfg(not(unix))]
    {
        use std::os::windows::io::{FromRawSocket, IntoRawSocket};
        // SAFETY: ownership of the raw socket is transferred.
        Ok(unsafe { compio::net::TcpListener::from_raw_socket(std_listener.into_raw_socket()) })
    }
}

/// Shut down both directions of a connected socket by raw fd.
///
/// The writer task calls this when the hub closes a client, so the
/// reader task sharing the same descriptor wakes up with EOF instead of
/// sitting in a read forever.
#[cfg(unix)]
pub fn shutdown_both(fd: std::os::unix::io::RawFd) {
    use std::os::unix::io::FromRawFd;

    // SAFETY: we borrow the fd for the duration of the call; mem::forget
    // keeps the temporary Socket from closing it.
    let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
    let _ = sock.shutdown(std::net::Shutdown::Both);
    std::mem::forget(sock);
}
