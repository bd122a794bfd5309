//! Zagreus wire protocol and automation layer (sans-IO).
//!
//! Everything in this crate is a state machine fed with bytes and
//! returning events or actions; no sockets, no clocks it didn't get
//! told about, no terminal. The IO shells live in the `zagreus` crate.
//!
//! - `codec`: the escape-framed byte stream shared by server and client
//! - `script`: the expect-engine step machine and its driver
//! - `scripts`: send/expect/sleep primitives and the boot composites
//! - `keys`: ASCII control-key tables for the client menu
//! - `server_session`: the server's protocol core
//! - `client_session`: the client's protocol core

pub mod client_session;
pub mod codec;
pub mod keys;
pub mod script;
pub mod scripts;
pub mod server_session;
