//! Zagreus Core
//!
//! This crate contains the runtime-agnostic core building blocks:
//! - Error types (`error`)
//! - Transport endpoint addressing (`endpoint`)
//! - Tunables and defaults (`config`)
//! - The serial+reset device abstraction (`device`)
//! - The bounded device-output tail (`backbuffer`)
//! - Split-pump connection and device actors (`actor`)
//! - TCP / Unix-socket listeners and streams (`net`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
pub mod actor;
pub mod backbuffer;
pub mod config;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod net;
pub mod tcp;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::actor::{ConnCmd, ConnEvent, ConnId, DeviceCmd, DeviceEvent};
    pub use crate::backbuffer::Backbuffer;
    pub use crate::config::ServerConfig;
    pub use crate::device::{DeviceLink, LoopbackHandle, LoopbackLink};
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Result, ZagreusError};
    pub use crate::net::{Listener, Stream};
}
