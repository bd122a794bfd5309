//! The client event loop.
//!
//! One hub fuses three inputs (server bytes, console keys, and the
//! active script's deadline) into single wakes, hands each to the
//! sans-IO [`ClientSession`], and executes the resulting actions. After
//! every wake the active script gets exactly one no-input poll, which is
//! what advances output-only steps and fires expect timeouts.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::FutureExt;
use tracing::{debug, info, warn};

use zagreus_core::actor::{self, ConnCmd, ConnEvent};
use zagreus_core::config::{self, DEFAULT_BUFFER_SIZE, SOCK_FILE};
use zagreus_core::endpoint::Endpoint;
use zagreus_core::error::{Result, ZagreusError};
use zagreus_core::net::Stream;
use zagreus_proto::client_session::{ClientAction, ClientSession};

use crate::console::{self, Console, ConsoleEvent};

/// Options forwarded to an auto-spawned background server.
#[derive(Debug, Clone)]
pub struct BackgroundOpts {
    pub reset_pin: u8,
    pub serial_port: PathBuf,
    pub baud: u32,
}

enum Wake {
    Server(ConnEvent),
    Console(ConsoleEvent),
    Gone,
    Tick,
}

/// An attached terminal client.
pub struct Client {
    session: ClientSession,
    console: Console,
    running: bool,

    conn_tx: Sender<ConnCmd>,
    server_rx: Receiver<ConnEvent>,
    console_rx: Receiver<ConsoleEvent>,
}

impl Client {
    /// Take over the terminal and start pumping `stream`.
    pub fn new(stream: Stream) -> Result<Self> {
        let console = Console::new()?;
        let session = ClientSession::new(console::clear_capability());

        let (conn_tx, cmd_rx) = flume::unbounded();
        let (server_tx, server_rx) = flume::unbounded();
        actor::spawn_conn(0, stream, server_tx, cmd_rx, DEFAULT_BUFFER_SIZE);

        let (console_tx, console_rx) = flume::unbounded();
        console.spawn_input_pump(console_tx)?;

        Ok(Self {
            session,
            console,
            running: true,
            conn_tx,
            server_rx,
            console_rx,
        })
    }

    /// Run until the connection drops or the user quits.
    pub async fn run(&mut self) -> Result<()> {
        while self.running {
            self.run_once().await;
        }
        Ok(())
    }

    /// Wait for one wake (bounded by the script deadline) and handle it.
    pub async fn run_once(&mut self) {
        if !self.running {
            return;
        }

        let wake = {
            let server = self.server_rx.recv_async().fuse();
            let keys = self.console_rx.recv_async().fuse();
            let timeout = self.session.script_timeout();
            let tick = async {
                match timeout {
                    Some(d) => compio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            }
            .fuse();
            futures::pin_mut!(server, keys, tick);
            futures::select! {
                s = server => match s {
                    Ok(event) => Wake::Server(event),
                    Err(_) => Wake::Gone,
                },
                k = keys => match k {
                    Ok(event) => Wake::Console(event),
                    Err(_) => Wake::Gone,
                },
                _ = tick => Wake::Tick,
            }
        };

        match wake {
            Wake::Server(ConnEvent::Bytes { bytes, .. }) => {
                let actions = self.session.on_server_bytes(&bytes);
                self.apply(actions);
            }
            Wake::Server(ConnEvent::Closed { .. }) => {
                info!("server closed the connection");
                self.close();
            }
            Wake::Console(ConsoleEvent::Key(key)) => {
                let actions = self.session.on_key(key);
                self.apply(actions);
            }
            Wake::Console(ConsoleEvent::Interrupted) | Wake::Gone => self.close(),
            Wake::Tick => {}
        }

        // One script advance per wake, whatever the wake was.
        if self.running {
            let actions = self.session.poll_script();
            self.apply(actions);
        }
    }

    fn apply(&mut self, actions: impl IntoIterator<Item = ClientAction>) {
        for action in actions {
            match action {
                ClientAction::WriteConsole(bytes) => self.console.write(&bytes),
                ClientAction::SendWire(bytes) => {
                    if self.conn_tx.send(ConnCmd::Send(bytes)).is_err() {
                        self.close();
                    }
                }
                ClientAction::ShowHelp(entries) => self.show_help(&entries),
                ClientAction::ScriptFailed(err) => {
                    warn!(error = %err, "script failed");
                    let _cooked = self.console.cooked();
                    self.console
                        .write(format!("script failed: {err}\n").as_bytes());
                }
                ClientAction::Close => self.close(),
            }
        }
    }

    fn show_help(&self, entries: &[(String, String)]) {
        let menu = self.session.menu_name();
        let _cooked = self.console.cooked();
        self.console.write(b"====\n");
        for (key, desc) in entries {
            self.console
                .write(format!("{menu} {key}\t{desc}\n").as_bytes());
        }
        self.console.write(b"====\n");
    }

    /// Tear down: socket first, then the terminal. Idempotent.
    pub fn close(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        let _ = self.conn_tx.send(ConnCmd::Close);
        self.console.cancel();
        self.console.cleanup();
    }
}

/// Connect to the default Unix socket, spawning a background server if
/// nothing is listening yet.
///
/// The spawned server exits on its own once idle, so a stack of stale
/// daemons never builds up.
pub async fn connect_or_spawn(opts: &BackgroundOpts) -> Result<Stream> {
    let endpoint = Endpoint::Ipc(PathBuf::from(SOCK_FILE));
    if let Ok(stream) = Stream::connect(&endpoint).await {
        return Ok(stream);
    }

    info!("no server running, starting one in the background");
    spawn_background_server(opts).map_err(|e| {
        warn!(error = %e, "failed to spawn zagreusd");
        ZagreusError::Startup
    })?;

    for attempt in 0..5 {
        compio::time::sleep(Duration::from_secs(1)).await;
        match Stream::connect(&endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(e) => debug!(attempt, error = %e, "connect retry failed"),
        }
    }
    Err(ZagreusError::Startup)
}

/// Launch a detached `zagreusd --exit-when-idle` on the default socket.
fn spawn_background_server(opts: &BackgroundOpts) -> std::io::Result<()> {
    let program = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("zagreusd")))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("zagreusd"));

    Command::new(program)
        .arg("--unix-socket")
        .arg(SOCK_FILE)
        .arg("--exit-when-idle")
        .arg("--daemonize")
        .arg("--pid-file")
        .arg(config::PID_FILE)
        .arg("--reset-pin")
        .arg(opts.reset_pin.to_string())
        .arg("--serial-port")
        .arg(&opts.serial_port)
        .arg("--baud")
        .arg(opts.baud.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_child| ())
}
