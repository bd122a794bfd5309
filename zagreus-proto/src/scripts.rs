//! The script library: primitives and the boot composites.
//!
//! Primitives mirror a classic expect kit (`send`, `receive`, `expect`,
//! `sleep`) and compose by sequencing: [`seq`] runs each child script to
//! completion before the next, so a composite like [`cpm`] is just the
//! monitor script followed by its own steps.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::codec::CMD_RESET;
use crate::script::{Payload, Script, ScriptError, Step};

/// Default deadline for `receive` and `expect`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Emit `data` and finish.
#[must_use]
pub fn send(data: &[u8]) -> Box<dyn Script> {
    Box::new(SendData {
        data: Some(Bytes::copy_from_slice(data)),
    })
}

/// Emit an in-band command frame and finish.
#[must_use]
pub fn send_command(cmd: u8) -> Box<dyn Script> {
    Box::new(SendCommand { cmd: Some(cmd) })
}

/// Wait for one input chunk, or give up after `timeout`.
#[must_use]
pub fn receive(timeout: Duration) -> Box<dyn Script> {
    Box::new(Receive {
        timeout,
        deadline: None,
    })
}

/// Accumulate input until `pattern` appears, failing after `timeout`.
#[must_use]
pub fn expect(pattern: &str, timeout: Duration) -> Box<dyn Script> {
    Box::new(Expect {
        pattern: Bytes::copy_from_slice(pattern.as_bytes()),
        timeout,
        deadline: None,
        gather: BytesMut::new(),
    })
}

/// Discard input for `duration`, then finish.
#[must_use]
pub fn sleep(duration: Duration) -> Box<dyn Script> {
    Box::new(Sleep {
        duration,
        deadline: None,
    })
}

/// Run each script to completion, in order.
#[must_use]
pub fn seq(scripts: Vec<Box<dyn Script>>) -> Box<dyn Script> {
    Box::new(Seq {
        scripts: scripts.into(),
    })
}

/// Reset the board and wait for the monitor banner.
#[must_use]
pub fn small_computer_monitor() -> Box<dyn Script> {
    seq(vec![
        send_command(CMD_RESET),
        expect(
            "Small Computer Monitor - RC2014\r\n*",
            Duration::from_secs(3),
        ),
    ])
}

/// Boot all the way into CP/M.
#[must_use]
pub fn cpm() -> Box<dyn Script> {
    seq(vec![
        small_computer_monitor(),
        sleep(Duration::from_millis(300)),
        send(b"CPM\n"),
        expect("A>", Duration::from_secs(5)),
    ])
}

/// Boot into BASIC, accepting the default memory top.
#[must_use]
pub fn basic() -> Box<dyn Script> {
    seq(vec![
        small_computer_monitor(),
        send(b"BASIC\n"),
        expect("Memory top? ", DEFAULT_TIMEOUT),
        send(b"\n"),
        expect("Ok", DEFAULT_TIMEOUT),
    ])
}

struct SendData {
    data: Option<Bytes>,
}

impl Script for SendData {
    fn step(&mut self, _input: Option<Bytes>) -> Step {
        match self.data.take() {
            Some(data) => Step::Emit(Payload::Data(data)),
            None => Step::Done,
        }
    }
}

struct SendCommand {
    cmd: Option<u8>,
}

impl Script for SendCommand {
    fn step(&mut self, _input: Option<Bytes>) -> Step {
        match self.cmd.take() {
            Some(cmd) => Step::Emit(Payload::Command(cmd)),
            None => Step::Done,
        }
    }
}

struct Receive {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Script for Receive {
    fn step(&mut self, input: Option<Bytes>) -> Step {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + self.timeout);
        match input {
            Some(_) => Step::Done,
            None if Instant::now() > deadline => Step::Done,
            None => Step::Wait(Some(deadline)),
        }
    }
}

struct Expect {
    pattern: Bytes,
    timeout: Duration,
    deadline: Option<Instant>,
    gather: BytesMut,
}

impl Script for Expect {
    fn step(&mut self, input: Option<Bytes>) -> Step {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + self.timeout);
        match input {
            Some(chunk) => {
                self.gather.extend_from_slice(&chunk);
                if contains(&self.gather, &self.pattern) {
                    Step::Done
                } else {
                    Step::Wait(Some(deadline))
                }
            }
            None if Instant::now() > deadline => Step::Fail(ScriptError::Timeout(
                String::from_utf8_lossy(&self.pattern).into_owned(),
            )),
            None => Step::Wait(Some(deadline)),
        }
    }
}

struct Sleep {
    duration: Duration,
    deadline: Option<Instant>,
}

impl Script for Sleep {
    fn step(&mut self, input: Option<Bytes>) -> Step {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + self.duration);
        match input {
            // Input during a sleep is discarded.
            Some(_) => Step::Wait(Some(deadline)),
            None if Instant::now() > deadline => Step::Done,
            None => Step::Wait(Some(deadline)),
        }
    }
}

struct Seq {
    scripts: VecDeque<Box<dyn Script>>,
}

impl Script for Seq {
    fn step(&mut self, mut input: Option<Bytes>) -> Step {
        loop {
            let Some(front) = self.scripts.front_mut() else {
                return Step::Done;
            };
            match front.step(input.take()) {
                Step::Done => {
                    // The finished child consumed the input; the next
                    // child starts fresh.
                    self.scripts.pop_front();
                }
                other => return other,
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
