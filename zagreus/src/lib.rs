//! Zagreus
//!
//! A shared serial console for a Z80 single-board computer. One daemon
//! owns the serial line and the reset wire; any number of terminal
//! clients attach over TCP or a Unix socket, see the same output (with
//! an 8 KiB scrollback replayed on connect), and can drive the board by
//! hand or through expect-style boot scripts bound to the client menu.
//!
//! The crates underneath:
//! - `zagreus-core`: errors, endpoints, the device abstraction, actors
//! - `zagreus-proto`: the wire codec, the script engine, the sans-IO
//!   server/client state machines
//! - this crate: the compio event loops, the terminal, the binaries

pub mod client;
pub mod console;
pub mod daemon;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod logging;
pub mod server;

// Re-export the pieces embedders actually touch.
pub use zagreus_core::config::{self, ServerConfig};
pub use zagreus_core::device::{DeviceLink, LoopbackHandle, LoopbackLink};
pub use zagreus_core::endpoint::Endpoint;
pub use zagreus_core::error::{Result, ZagreusError};
pub use zagreus_proto::scripts;
