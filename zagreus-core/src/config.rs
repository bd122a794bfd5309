//! Server tunables and wire defaults.
//!
//! The defaults match the deployed setup: a Z80 board on a slow serial
//! line, one or two interactive clients, and an 8 KiB scrollback replay.

use std::time::Duration;

/// Default read size for socket and device reads (1KB)
///
/// The serial line runs at 115200 baud, so a single wake rarely carries
/// more than a few dozen bytes; 1024 leaves plenty of headroom.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default backbuffer capacity (8KB)
///
/// The tail of device output replayed to each newly-connected client.
pub const DEFAULT_BACKBUFFER_MAX: usize = 1024 * 8;

/// How often the device pump polls the non-blocking serial read
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the reset line is held asserted
pub const RESET_PULSE: Duration = Duration::from_millis(100);

/// Default TCP bind/connect host
pub const DEFAULT_HOST: &str = "localhost";

/// Default TCP port
pub const DEFAULT_PORT: u16 = 9999;

/// Default Unix socket path
pub const SOCK_FILE: &str = "/tmp/zagreus.sock";

/// Default PID file path
pub const PID_FILE: &str = "/tmp/zagreus.pid";

/// Idle timeout for `--exit-when-idle` servers
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server buffer configuration
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Per-read chunk size for sockets and the device
    pub buffer_size: usize,
    /// Backbuffer capacity in bytes
    pub backbuffer_max: usize,
    /// Device pump poll interval
    pub device_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            backbuffer_max: DEFAULT_BACKBUFFER_MAX,
            device_poll: DEVICE_POLL_INTERVAL,
        }
    }
}
