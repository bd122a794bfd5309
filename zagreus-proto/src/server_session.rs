//! Sans-IO server core.
//!
//! Owns everything about the server that is not a socket: the
//! backbuffer, one wire decoder per client, in-band command dispatch,
//! and the newline convention of the board. The IO shell feeds it bytes
//! and executes the [`ServerAction`]s it returns, in order.

use bytes::{BufMut, Bytes, BytesMut};
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::debug;

use zagreus_core::actor::ConnId;
use zagreus_core::backbuffer::Backbuffer;

use crate::codec::{self, Segment, WireDecoder, CMD_RESET};

/// What the IO shell must do next, in order.
#[derive(Debug)]
pub enum ServerAction {
    /// Send wire bytes to every connected client.
    Broadcast(Bytes),
    /// Write payload bytes to the device.
    DeviceWrite(Bytes),
    /// Pulse the device reset line.
    ResetDevice,
}

/// The server's protocol state.
pub struct ServerSession {
    backbuffer: Backbuffer,
    decoders: HashMap<ConnId, WireDecoder>,
}

impl ServerSession {
    #[must_use]
    pub fn new(backbuffer_max: usize) -> Self {
        Self {
            backbuffer: Backbuffer::new(backbuffer_max),
            decoders: HashMap::new(),
        }
    }

    /// Register a new client and return the wire-encoded backbuffer
    /// snapshot it must receive before any live output.
    pub fn on_accept(&mut self, id: ConnId) -> Bytes {
        self.decoders.insert(id, WireDecoder::new());
        codec::encode(&self.backbuffer.snapshot())
    }

    /// Forget a closed client's decoder state.
    pub fn on_client_gone(&mut self, id: ConnId) {
        self.decoders.remove(&id);
    }

    /// The device produced output: record it and fan it out.
    pub fn on_device_bytes(&mut self, data: &[u8]) -> ServerAction {
        self.backbuffer.push(data);
        ServerAction::Broadcast(codec::encode(data))
    }

    /// A client sent bytes: decode and dispatch.
    ///
    /// Data goes to the device (with the terminal's LF rewritten to the
    /// board's CR+LF); a reset command pulses the board and broadcasts a
    /// bare newline so every terminal shows that something happened.
    /// Unknown commands are dropped.
    pub fn on_client_bytes(&mut self, id: ConnId, bytes: &[u8]) -> SmallVec<[ServerAction; 4]> {
        let mut actions = SmallVec::new();
        let decoder = self.decoders.entry(id).or_default();
        for segment in decoder.decode(bytes) {
            match segment {
                Segment::Command(CMD_RESET) => {
                    debug!(id, "client requested reset");
                    actions.push(ServerAction::ResetDevice);
                    self.backbuffer.push(b"\n");
                    actions.push(ServerAction::Broadcast(codec::encode(b"\n")));
                }
                Segment::Command(c) => {
                    debug!(id, command = c, "ignoring unknown command");
                }
                Segment::Data(data) => {
                    debug!(id, len = data.len(), "client data");
                    actions.push(ServerAction::DeviceWrite(lf_to_crlf(&data)));
                }
            }
        }
        actions
    }
}

/// Turn ENTER into CR+LF on the way to the board.
fn lf_to_crlf(data: &[u8]) -> Bytes {
    if !data.contains(&b'\n') {
        return Bytes::copy_from_slice(data);
    }
    let mut out = BytesMut::with_capacity(data.len() + 8);
    for &b in data {
        if b == b'\n' {
            out.put_u8(b'\r');
        }
        out.put_u8(b);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_replays_the_backbuffer() {
        let mut session = ServerSession::new(64);
        let _ = session.on_device_bytes(b"ABC");
        assert_eq!(&session.on_accept(1)[..], &codec::encode(b"ABC")[..]);

        let _ = session.on_device_bytes(b"DE");
        assert_eq!(&session.on_accept(2)[..], &codec::encode(b"ABCDE")[..]);
    }

    #[test]
    fn backbuffer_replay_is_trimmed() {
        let mut session = ServerSession::new(4);
        let _ = session.on_device_bytes(b"0123456789");
        assert_eq!(&session.on_accept(1)[..], &codec::encode(b"6789")[..]);
    }

    #[test]
    fn client_data_goes_only_to_the_device() {
        let mut session = ServerSession::new(64);
        session.on_accept(1);
        let actions = session.on_client_bytes(1, &codec::encode(b"hi"));
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ServerAction::DeviceWrite(d) if &d[..] == b"hi"
        ));
    }

    #[test]
    fn enter_becomes_crlf() {
        let mut session = ServerSession::new(64);
        session.on_accept(1);
        let actions = session.on_client_bytes(1, &codec::encode(b"hi\n"));
        assert!(matches!(
            &actions[0],
            ServerAction::DeviceWrite(d) if &d[..] == b"hi\r\n"
        ));
    }

    #[test]
    fn reset_command_pulses_and_broadcasts_one_newline() {
        let mut session = ServerSession::new(64);
        session.on_accept(1);
        let actions = session.on_client_bytes(1, &codec::command(CMD_RESET));
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], ServerAction::ResetDevice));
        assert!(matches!(
            &actions[1],
            ServerAction::Broadcast(w) if &w[..] == &codec::encode(b"\n")[..]
        ));
    }

    #[test]
    fn escaped_sentinel_is_data_not_reset() {
        let mut session = ServerSession::new(64);
        session.on_accept(1);
        let actions = session.on_client_bytes(1, &[0xff, 0xff]);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ServerAction::DeviceWrite(d) if &d[..] == b"\xff"
        ));
    }

    #[test]
    fn split_command_frame_across_reads() {
        let mut session = ServerSession::new(64);
        session.on_accept(1);
        assert!(session.on_client_bytes(1, &[0xff]).is_empty());
        let actions = session.on_client_bytes(1, b"r");
        assert!(matches!(actions[0], ServerAction::ResetDevice));
    }

    #[test]
    fn unknown_commands_are_dropped() {
        let mut session = ServerSession::new(64);
        session.on_accept(1);
        assert!(session.on_client_bytes(1, &codec::command(b'z')).is_empty());
    }
}
