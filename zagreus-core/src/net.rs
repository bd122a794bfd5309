//! TCP / Unix-socket listeners and streams.
//!
//! Both transports collapse into one [`Listener`]/[`Stream`] pair so the
//! server and client never branch on the transport outside this module.
//! Streams are cheaply cloneable (shared fd), which is what lets each
//! connection run one reader task and one writer task.

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWriteExt};
use compio::net::TcpStream;
#[cfg(unix)]
use compio::net::{UnixListener, UnixStream};

use crate::endpoint::Endpoint;
use crate::tcp;

/// Address label attached to an accepted connection: `"local"` for Unix
/// sockets, the peer IP string for TCP.
pub type PeerLabel = String;

/// A bound listening socket.
pub enum Listener {
    Tcp(compio::net::TcpListener),
    #[cfg(unix)]
    Ipc(UnixListener, PathBuf),
}

impl Listener {
    /// Bind a listener for `endpoint`.
    ///
    /// TCP listeners get `SO_REUSEADDR`; a pre-existing Unix socket file
    /// is unlinked first, matching the usual daemon restart dance.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(tcp::bind_reuse(*addr)?)),
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path).await?;
                Ok(Self::Ipc(listener, path.clone()))
            }
        }
    }

    /// Accept one connection, labeled with its peer address.
    pub async fn accept(&self) -> io::Result<(Stream, PeerLabel)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Stream::Tcp(stream), addr.ip().to_string()))
            }
            #[cfg(unix)]
            Self::Ipc(listener, _) => {
                let (stream, _addr) = listener.accept().await?;
                Ok((Stream::Ipc(stream), "local".to_string()))
            }
        }
    }

    /// Remove any filesystem residue (the Unix socket file).
    pub fn cleanup(&self) {
        #[cfg(unix)]
        if let Self::Ipc(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A connected stream over either transport.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Ipc(UnixStream),
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        use compio::runtime::TryClone;
        match self {
            Self::Tcp(s) => Self::Tcp(s.try_clone().expect("dup of TCP stream fd failed")),
            #[cfg(unix)]
            Self::Ipc(s) => Self::Ipc(s.try_clone().expect("dup of Unix stream fd failed")),
        }
    }
}

impl Stream {
    /// Connect to `endpoint`.
    pub async fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpStream::connect(addr).await?)),
            #[cfg(unix)]
            Endpoint::Ipc(path) => Ok(Self::Ipc(UnixStream::connect(path).await?)),
        }
    }

    /// Read one chunk of up to `max` bytes. `Ok` with an empty chunk is
    /// EOF.
    pub async fn read_chunk(&mut self, max: usize) -> io::Result<Bytes> {
        let buf = Vec::with_capacity(max);
        let BufResult(res, mut buf) = match self {
            Self::Tcp(s) => s.read(buf).await,
            #[cfg(unix)]
            Self::Ipc(s) => s.read(buf).await,
        };
        let n = res?;
        buf.truncate(n);
        Ok(buf.into())
    }

    /// Write the whole of `data`.
    pub async fn write_all(&mut self, data: Bytes) -> io::Result<()> {
        let owned = data.to_vec();
        let BufResult(res, _) = match self {
            Self::Tcp(s) => s.write_all(owned).await,
            #[cfg(unix)]
            Self::Ipc(s) => s.write_all(owned).await,
        };
        res.map(|_| ())
    }

    /// Shut down both directions, waking any task blocked reading the
    /// shared fd.
    #[cfg(unix)]
    pub fn shutdown_now(&self) {
        use std::os::unix::io::AsRawFd;
        let fd = match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Ipc(s) => s.as_raw_fd(),
        };
        tcp::shutdown_both(fd);
    }

    #[cfg(not(unix))]
    pub fn shutdown_now(&self) {}
}
