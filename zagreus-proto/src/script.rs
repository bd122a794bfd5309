//! The expect-engine step machine.
//!
//! A script is a value with a single entry point: [`Script::step`] takes
//! the next input chunk (or `None` when there is none, or the step's
//! deadline has passed) and answers with what it wants next. The driver,
//! [`ScriptRunner`], owns the active script and turns `interact` calls
//! from the client event loop into an ordered list of [`ScriptEvent`]s,
//! the same feed-bytes, collect-events shape as the rest of this crate.
//!
//! Lifecycle: *not started → running → (completed | failed)*. Terminal
//! states drop the script; a failure is reported exactly once, after
//! which the runner is inert until the next [`ScriptRunner::start`].

use std::time::{Duration, Instant};

use bytes::Bytes;
use smallvec::SmallVec;
use thiserror::Error;

/// Script failures, reported once through [`ScriptEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// An `expect` deadline passed with no match.
    #[error("timed out expecting {0:?}")]
    Timeout(String),

    /// Any other failure inside a script.
    #[error("{0}")]
    Failed(String),
}

/// What a script wants to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain bytes for the device.
    Data(Bytes),
    /// An in-band command frame (e.g. reset).
    Command(u8),
}

/// Result of advancing a script one step.
#[derive(Debug)]
pub enum Step {
    /// Emit output, then advance again.
    Emit(Payload),
    /// Pause for input until the deadline (or forever with `None`).
    Wait(Option<Instant>),
    /// The script finished.
    Done,
    /// The script failed; no further steps.
    Fail(ScriptError),
}

/// A cooperatively-driven automation script.
pub trait Script {
    /// Advance, consuming `input` if any. `None` means either "nothing
    /// yet, your move" or, when a `Wait` deadline has elapsed, "timed
    /// out".
    fn step(&mut self, input: Option<Bytes>) -> Step;
}

/// Events produced by one `interact` call.
#[derive(Debug)]
pub enum ScriptEvent {
    /// The script emitted output for the wire.
    Output(Payload),
    /// The script failed and is now inert.
    Error(ScriptError),
}

/// Driver for the active script.
///
/// At most one script runs at a time; starting a new one discards any
/// script still in flight.
#[derive(Default)]
pub struct ScriptRunner {
    script: Option<Box<dyn Script>>,
    waiting: bool,
    deadline: Option<Instant>,
}

impl ScriptRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate `script`, replacing whatever was active.
    pub fn start(&mut self, script: Box<dyn Script>) {
        self.script = Some(script);
        self.waiting = false;
        self.deadline = None;
    }

    /// Whether a script is currently active.
    #[must_use]
    pub fn active(&self) -> bool {
        self.script.is_some()
    }

    /// Remaining time until the current step's deadline.
    ///
    /// `None` when there is no active script or the step has no
    /// deadline; the event loop uses this as its wait bound.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        if !self.waiting {
            return None;
        }
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Advance the active script with `input` (or none).
    ///
    /// Input is consumed at most once; a waiting step with an unexpired
    /// deadline and no input leaves the script untouched. An elapsed
    /// deadline feeds `None` into the script so it can run its own
    /// timeout handling.
    pub fn interact(&mut self, input: Option<Bytes>) -> SmallVec<[ScriptEvent; 2]> {
        let mut events = SmallVec::new();
        let Some(mut script) = self.script.take() else {
            return events;
        };

        let mut input = input;
        let mut finished = false;
        loop {
            if self.waiting && input.is_none() {
                let expired = self.deadline.is_some_and(|d| Instant::now() > d);
                if !expired {
                    break;
                }
            }
            match script.step(input.take()) {
                Step::Emit(payload) => {
                    events.push(ScriptEvent::Output(payload));
                    self.waiting = false;
                    self.deadline = None;
                }
                Step::Wait(deadline) => {
                    self.waiting = true;
                    self.deadline = deadline;
                }
                Step::Done => {
                    finished = true;
                    break;
                }
                Step::Fail(err) => {
                    events.push(ScriptEvent::Error(err));
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            self.waiting = false;
            self.deadline = None;
        } else {
            self.script = Some(script);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits once, then waits for one chunk, then finishes.
    struct EmitThenWait {
        emitted: bool,
        got: Option<Bytes>,
    }

    impl Script for EmitThenWait {
        fn step(&mut self, input: Option<Bytes>) -> Step {
            if !self.emitted {
                self.emitted = true;
                return Step::Emit(Payload::Data(Bytes::from_static(b"go")));
            }
            match input {
                Some(chunk) => {
                    self.got = Some(chunk);
                    Step::Done
                }
                None => Step::Wait(None),
            }
        }
    }

    #[test]
    fn emits_then_waits_then_completes() {
        let mut runner = ScriptRunner::new();
        runner.start(Box::new(EmitThenWait {
            emitted: false,
            got: None,
        }));

        let events = runner.interact(None);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ScriptEvent::Output(Payload::Data(d)) if &d[..] == b"go"
        ));
        assert!(runner.active());
        assert_eq!(runner.timeout(), None);

        // No input and no deadline: nothing happens.
        assert!(runner.interact(None).is_empty());
        assert!(runner.active());

        assert!(runner.interact(Some(Bytes::from_static(b"in"))).is_empty());
        assert!(!runner.active());
    }

    struct AlwaysFail;

    impl Script for AlwaysFail {
        fn step(&mut self, _input: Option<Bytes>) -> Step {
            Step::Fail(ScriptError::Failed("broken".into()))
        }
    }

    #[test]
    fn failure_reported_once_then_inert() {
        let mut runner = ScriptRunner::new();
        runner.start(Box::new(AlwaysFail));

        let events = runner.interact(None);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ScriptEvent::Error(_)));
        assert!(!runner.active());
        assert!(runner.interact(None).is_empty());
    }

    #[test]
    fn inactive_runner_is_a_no_op() {
        let mut runner = ScriptRunner::new();
        assert!(!runner.active());
        assert!(runner.interact(Some(Bytes::from_static(b"x"))).is_empty());
        assert_eq!(runner.timeout(), None);
    }
}
