/// Zagreus Error Types
///
/// Shared error handling for server and client operations.
use std::io;
use thiserror::Error;

/// Main error type for zagreus operations
#[derive(Error, Debug)]
pub enum ZagreusError {
    /// IO error outside the transport/device split
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Socket-level failure on a single endpoint
    #[error("transport error: {0}")]
    Transport(io::Error),

    /// Serial or reset-line failure; fatal to the server instance
    #[error("device error: {0}")]
    Device(io::Error),

    /// Operation on a server or client that has already shut down
    #[error("already closed")]
    Closed,

    /// Background server could not be started
    #[error("could not start background server")]
    Startup,
}

/// Result type alias for zagreus operations
pub type Result<T> = std::result::Result<T, ZagreusError>;
