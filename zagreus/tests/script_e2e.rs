//! The CP/M boot script against a scripted board, end to end: real
//! server, real socket, real client session machine; only the terminal
//! is absent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use zagreus::server::Server;
use zagreus::{scripts, DeviceLink, Endpoint, ServerConfig};
use zagreus_core::net::Stream;
use zagreus_proto::client_session::{ClientAction, ClientSession};
use zagreus_proto::script::ScriptError;

const BANNER: &[u8] = b"Small Computer Monitor - RC2014\r\n*";

#[derive(Default)]
struct BoardState {
    pending: VecDeque<u8>,
    written: Vec<u8>,
}

/// A pretend monitor ROM: banner after reset, and (optionally) the CP/M
/// prompt once `CPM` has been typed at it.
struct ScriptedBoard {
    state: Rc<RefCell<BoardState>>,
    answers_cpm: bool,
}

impl ScriptedBoard {
    fn new(answers_cpm: bool) -> (Self, Rc<RefCell<BoardState>>) {
        let state = Rc::new(RefCell::new(BoardState::default()));
        (
            Self {
                state: Rc::clone(&state),
                answers_cpm,
            },
            state,
        )
    }
}

#[async_trait(?Send)]
impl DeviceLink for ScriptedBoard {
    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let mut st = self.state.borrow_mut();
        let take = st.pending.len().min(max);
        let out: Vec<u8> = st.pending.drain(..take).collect();
        Ok(out.into())
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.written.extend_from_slice(&data);
        if self.answers_cpm && st.written.ends_with(b"CPM\r\n") {
            st.pending.extend(b"\r\nA>");
        }
        Ok(())
    }

    async fn reset(&mut self) -> io::Result<()> {
        self.state.borrow_mut().pending.extend(BANNER);
        Ok(())
    }
}

fn runtime() -> compio::runtime::Runtime {
    compio::runtime::Runtime::new().expect("compio runtime")
}

fn test_config() -> ServerConfig {
    ServerConfig {
        buffer_size: 1024,
        backbuffer_max: 1024 * 8,
        device_poll: Duration::from_millis(1),
    }
}

fn sock_endpoint(tag: &str) -> Endpoint {
    let path = std::env::temp_dir().join(format!("zagreus-{}-{}.sock", tag, std::process::id()));
    Endpoint::Ipc(path)
}

/// Execute actions against the socket; surface any script failure.
async fn drive(
    stream: &mut Stream,
    actions: impl IntoIterator<Item = ClientAction>,
) -> Option<ScriptError> {
    let mut failure = None;
    for action in actions {
        match action {
            ClientAction::SendWire(bytes) => stream.write_all(bytes).await.expect("send"),
            ClientAction::ScriptFailed(err) => failure = Some(err),
            _ => {}
        }
    }
    failure
}

/// Pump the session until its script finishes, one way or the other.
async fn run_script(
    session: &mut ClientSession,
    stream: &mut Stream,
    overall: Duration,
) -> Result<(), ScriptError> {
    let deadline = Instant::now() + overall;
    while session.script_active() {
        assert!(Instant::now() < deadline, "script never finished");

        let actions = session.poll_script();
        if let Some(err) = drive(stream, actions).await {
            return Err(err);
        }
        if !session.script_active() {
            break;
        }

        match compio::time::timeout(Duration::from_millis(50), stream.read_chunk(1024)).await {
            Ok(Ok(chunk)) if !chunk.is_empty() => {
                let actions = session.on_server_bytes(&chunk);
                if let Some(err) = drive(stream, actions).await {
                    return Err(err);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[test]
fn cpm_script_boots_the_scripted_board() {
    runtime().block_on(async {
        let endpoint = sock_endpoint("cpm");
        let (board, state) = ScriptedBoard::new(true);
        let mut server = Server::bind(&endpoint, Box::new(board), test_config())
            .await
            .expect("server bind");
        compio::runtime::spawn(async move {
            let _ = server.serve_forever().await;
        })
        .detach();

        let mut stream = Stream::connect(&endpoint).await.expect("connect");
        let mut session = ClientSession::new(Bytes::new());
        session.start_script(scripts::cpm());

        run_script(&mut session, &mut stream, Duration::from_secs(10))
            .await
            .expect("cpm script should complete");

        let written = state.borrow().written.clone();
        assert!(
            written.ends_with(b"CPM\r\n"),
            "board never got the CPM command: {written:?}"
        );
    });
}

#[test]
fn cpm_script_times_out_without_a_prompt() {
    runtime().block_on(async {
        let endpoint = sock_endpoint("cpm-timeout");
        let (board, _state) = ScriptedBoard::new(false);
        let mut server = Server::bind(&endpoint, Box::new(board), test_config())
            .await
            .expect("server bind");
        compio::runtime::spawn(async move {
            let _ = server.serve_forever().await;
        })
        .detach();

        let mut stream = Stream::connect(&endpoint).await.expect("connect");
        let mut session = ClientSession::new(Bytes::new());
        session.start_script(scripts::cpm());

        let err = run_script(&mut session, &mut stream, Duration::from_secs(10))
            .await
            .expect_err("script should time out");
        assert!(matches!(err, ScriptError::Timeout(p) if p == "A>"));
        assert!(!session.script_active());
    });
}
