//! Sans-IO client core.
//!
//! Everything the client decides (menu dispatch, form-feed rewriting,
//! script lifecycle) happens here, against plain bytes. The IO shell
//! owns the socket and the terminal and just executes the returned
//! [`ClientAction`]s in order, which keeps the whole client testable
//! without a tty.

use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use tracing::debug;

use crate::codec::{self, Segment, WireDecoder};
use crate::keys::{base_key, control, pretty_key};
use crate::script::{Payload, Script, ScriptError, ScriptEvent, ScriptRunner};
use crate::scripts;

/// Form feed in device output is rewritten to the clear capability.
const FORM_FEED: u8 = 0x0c;

/// What the IO shell must do next, in order.
#[derive(Debug)]
pub enum ClientAction {
    /// Write bytes to the terminal.
    WriteConsole(Bytes),
    /// Send raw wire bytes to the server.
    SendWire(Bytes),
    /// Print the menu help listing (cooked mode).
    ShowHelp(Vec<(String, String)>),
    /// The active script failed; report it (cooked mode) and carry on.
    ScriptFailed(ScriptError),
    /// Close the client.
    Close,
}

/// The client's protocol state.
pub struct ClientSession {
    decoder: WireDecoder,
    runner: ScriptRunner,
    in_menu: bool,
    menu_key: u8,
    clear: Bytes,
}

impl ClientSession {
    /// `clear` is the terminal's clear-screen byte sequence.
    #[must_use]
    pub fn new(clear: Bytes) -> Self {
        Self {
            decoder: WireDecoder::new(),
            runner: ScriptRunner::new(),
            in_menu: false,
            menu_key: control(b'a').unwrap_or(0x01),
            clear,
        }
    }

    /// Override the menu prefix key.
    #[must_use]
    pub fn with_menu_key(mut self, key: u8) -> Self {
        self.menu_key = key;
        self
    }

    /// Wait bound for the event loop: the active script's deadline.
    #[must_use]
    pub fn script_timeout(&self) -> Option<std::time::Duration> {
        self.runner.timeout()
    }

    #[must_use]
    pub fn script_active(&self) -> bool {
        self.runner.active()
    }

    /// Activate a script, replacing any script still in flight.
    pub fn start_script(&mut self, script: Box<dyn Script>) {
        self.runner.start(script);
    }

    /// Bytes arrived from the server.
    pub fn on_server_bytes(&mut self, bytes: &[u8]) -> SmallVec<[ClientAction; 4]> {
        let mut actions = SmallVec::new();
        for segment in self.decoder.decode(bytes) {
            match segment {
                Segment::Command(c) => {
                    // Reserved for future server-to-client commands.
                    debug!(command = c, "ignoring server command");
                }
                Segment::Data(data) => {
                    actions.push(ClientAction::WriteConsole(self.rewrite_formfeed(&data)));
                    if self.runner.active() {
                        self.drive_script(Some(data), &mut actions);
                    }
                }
            }
        }
        actions
    }

    /// One key arrived from the console.
    pub fn on_key(&mut self, key: u8) -> SmallVec<[ClientAction; 4]> {
        if self.in_menu {
            self.in_menu = false;
            return self.menu_action(key);
        }
        if key == self.menu_key {
            self.in_menu = true;
            return SmallVec::new();
        }
        let mut actions = SmallVec::new();
        actions.push(ClientAction::SendWire(codec::encode(&[key])));
        actions
    }

    /// Advance the active script with no input; call once per wake so
    /// output-only steps and elapsed deadlines make progress.
    pub fn poll_script(&mut self) -> SmallVec<[ClientAction; 4]> {
        let mut actions = SmallVec::new();
        if self.runner.active() {
            self.drive_script(None, &mut actions);
        }
        actions
    }

    fn drive_script(&mut self, input: Option<Bytes>, actions: &mut SmallVec<[ClientAction; 4]>) {
        for event in self.runner.interact(input) {
            match event {
                ScriptEvent::Output(Payload::Data(data)) => {
                    actions.push(ClientAction::SendWire(codec::encode(&data)));
                }
                ScriptEvent::Output(Payload::Command(c)) => {
                    actions.push(ClientAction::SendWire(codec::command(c)));
                }
                ScriptEvent::Error(err) => {
                    actions.push(ClientAction::ScriptFailed(err));
                }
            }
        }
    }

    fn menu_action(&mut self, key: u8) -> SmallVec<[ClientAction; 4]> {
        let mut actions = SmallVec::new();
        match base_key(key) {
            b'r' => self.start_script(scripts::small_computer_monitor()),
            b'l' => actions.push(ClientAction::WriteConsole(self.clear.clone())),
            b'c' => self.start_script(scripts::cpm()),
            b'b' => self.start_script(scripts::basic()),
            b'x' | b'q' => actions.push(ClientAction::Close),
            b'h' | b'?' => actions.push(ClientAction::ShowHelp(self.bindings())),
            k if k == base_key(self.menu_key) => {
                // Doubled prefix sends the prefix itself.
                actions.push(ClientAction::SendWire(codec::encode(&[self.menu_key])));
            }
            _ => {} // unrecognized keys are consumed silently
        }
        actions
    }

    /// The help table: key name, description.
    #[must_use]
    pub fn bindings(&self) -> Vec<(String, String)> {
        let menu = pretty_key(self.menu_key);
        vec![
            ("R".into(), "reset into monitor".into()),
            ("L".into(), "clear screen".into()),
            ("C".into(), "boot cp/m".into()),
            ("B".into(), "boot basic".into()),
            ("X".into(), "exit".into()),
            (menu.clone(), format!("send {menu}")),
            ("H".into(), "help".into()),
        ]
    }

    /// Name used when printing the menu prefix, e.g. `C-A`.
    #[must_use]
    pub fn menu_name(&self) -> String {
        pretty_key(self.menu_key)
    }

    fn rewrite_formfeed(&self, data: &[u8]) -> Bytes {
        if !data.contains(&FORM_FEED) {
            return Bytes::copy_from_slice(data);
        }
        let mut out = BytesMut::with_capacity(data.len() + self.clear.len());
        for &b in data {
            if b == FORM_FEED {
                out.extend_from_slice(&self.clear);
            } else {
                out.put_u8(b);
            }
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CMD_RESET;
    use crate::scripts;
    use std::time::Duration;

    const CLEAR: &[u8] = b"\x1b[H\x1b[2J";
    const MENU: u8 = 0x01; // Ctrl-A

    fn session() -> ClientSession {
        ClientSession::new(Bytes::from_static(CLEAR))
    }

    #[test]
    fn plain_keys_are_forwarded_encoded() {
        let mut s = session();
        let actions = s.on_key(b'h');
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ClientAction::SendWire(w) if &w[..] == b"h"
        ));
    }

    #[test]
    fn doubled_menu_key_sends_one_literal_prefix() {
        let mut s = session();
        assert!(s.on_key(MENU).is_empty()); // latch
        let actions = s.on_key(MENU);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ClientAction::SendWire(w) if &w[..] == &[MENU]
        ));
        // Latch ends cleared: the next key is forwarded normally.
        let actions = s.on_key(b'a');
        assert!(matches!(
            &actions[0],
            ClientAction::SendWire(w) if &w[..] == b"a"
        ));
    }

    #[test]
    fn menu_quit_closes() {
        let mut s = session();
        s.on_key(MENU);
        assert!(matches!(s.on_key(b'q')[0], ClientAction::Close));
        s.on_key(MENU);
        assert!(matches!(s.on_key(b'x')[0], ClientAction::Close));
    }

    #[test]
    fn menu_keys_are_control_and_case_insensitive() {
        let mut s = session();
        s.on_key(MENU);
        // Ctrl-Q normalizes to q
        assert!(matches!(s.on_key(0x11)[0], ClientAction::Close));
    }

    #[test]
    fn menu_clear_writes_the_capability() {
        let mut s = session();
        s.on_key(MENU);
        let actions = s.on_key(b'l');
        assert!(matches!(
            &actions[0],
            ClientAction::WriteConsole(w) if &w[..] == CLEAR
        ));
    }

    #[test]
    fn unknown_menu_keys_are_consumed() {
        let mut s = session();
        s.on_key(MENU);
        assert!(s.on_key(b'z').is_empty());
        // and not forwarded afterwards either
        let actions = s.on_key(b'z');
        assert!(matches!(&actions[0], ClientAction::SendWire(_)));
    }

    #[test]
    fn menu_reset_starts_the_monitor_script() {
        let mut s = session();
        s.on_key(MENU);
        assert!(s.on_key(b'r').is_empty());
        assert!(s.script_active());

        // The wake's script poll emits the reset command frame.
        let actions = s.poll_script();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ClientAction::SendWire(w) if &w[..] == &[0xff, CMD_RESET]
        ));
    }

    #[test]
    fn server_data_reaches_console_and_script() {
        let mut s = session();
        s.on_key(MENU);
        s.on_key(b'r');
        s.poll_script();

        let banner = b"Small Computer Monitor - RC2014\r\n*";
        let actions = s.on_server_bytes(&codec::encode(banner));
        assert!(matches!(
            &actions[0],
            ClientAction::WriteConsole(w) if &w[..] == banner
        ));
        // Banner satisfied the expect: script is done.
        assert!(!s.script_active());
    }

    #[test]
    fn form_feed_becomes_clear_capability() {
        let mut s = session();
        let actions = s.on_server_bytes(&codec::encode(b"a\x0cb"));
        let mut expected = Vec::new();
        expected.extend_from_slice(b"a");
        expected.extend_from_slice(CLEAR);
        expected.extend_from_slice(b"b");
        assert!(matches!(
            &actions[0],
            ClientAction::WriteConsole(w) if &w[..] == &expected[..]
        ));
    }

    #[test]
    fn server_commands_are_ignored() {
        let mut s = session();
        assert!(s.on_server_bytes(&codec::command(b'z')).is_empty());
    }

    #[test]
    fn script_timeout_surfaces_as_failure() {
        let mut s = session();
        s.start_script(scripts::expect("A>", Duration::from_millis(10)));
        assert!(s.poll_script().is_empty());
        std::thread::sleep(Duration::from_millis(20));
        let actions = s.poll_script();
        assert!(matches!(&actions[0], ClientAction::ScriptFailed(_)));
        assert!(!s.script_active());
    }

    #[test]
    fn help_lists_every_binding() {
        let mut s = session();
        s.on_key(MENU);
        let actions = s.on_key(b'?');
        match &actions[0] {
            ClientAction::ShowHelp(entries) => {
                assert!(entries.iter().any(|(k, _)| k == "R"));
                assert!(entries.iter().any(|(k, _)| k == "C-A"));
            }
            other => panic!("expected help, got {other:?}"),
        }
    }
}
