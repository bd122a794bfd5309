//! The server event loop.
//!
//! One hub task owns all the state; the listener, the device, and every
//! connection run as pump tasks that feed it over channels. Each pass
//! through [`Server::serve_once`] waits on all of them at once and
//! handles exactly one wake, so ordering falls out of the structure:
//!
//! - per-connection write queues are FIFO, and the backbuffer replay is
//!   queued inside the accept wake, before any later device fan-out can
//!   run, so a fresh client always sees replay-then-live, no duplicates;
//! - device output is fanned out in read order by the single hub, so
//!   every client sees the same byte sequence.
//!
//! A client failure closes that client. A device or listener failure
//! closes the server.

use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::{Receiver, Sender};
use futures::FutureExt;
use hashbrown::HashMap;
use tracing::{error, info, warn};

use zagreus_core::actor::{self, ConnCmd, ConnEvent, ConnId, DeviceCmd, DeviceEvent};
use zagreus_core::config::ServerConfig;
use zagreus_core::device::DeviceLink;
use zagreus_core::endpoint::Endpoint;
use zagreus_core::error::{Result, ZagreusError};
use zagreus_core::net::{Listener, PeerLabel, Stream};
use zagreus_proto::server_session::{ServerAction, ServerSession};

struct ConnHandle {
    tx: Sender<ConnCmd>,
    label: PeerLabel,
}

enum Wake {
    Accepted(Stream, PeerLabel),
    ListenerGone,
    Conn(ConnEvent),
    Device(DeviceEvent),
    DeviceGone,
    Timeout,
}

/// The shared-console server.
pub struct Server {
    open: bool,
    session: ServerSession,
    conns: HashMap<ConnId, ConnHandle>,
    next_id: ConnId,
    cfg: ServerConfig,

    accept_rx: Receiver<(Stream, PeerLabel)>,
    stop_tx: Sender<()>,
    conn_tx: Sender<ConnEvent>,
    conn_rx: Receiver<ConnEvent>,
    dev_tx: Sender<DeviceCmd>,
    dev_rx: Receiver<DeviceEvent>,
}

impl Server {
    /// Bind `endpoint`, reset the board once, and start the pumps.
    pub async fn bind(
        endpoint: &Endpoint,
        mut link: Box<dyn DeviceLink>,
        cfg: ServerConfig,
    ) -> Result<Self> {
        let listener = Listener::bind(endpoint)
            .await
            .map_err(ZagreusError::Transport)?;
        info!(%endpoint, "listening");

        // One reset at startup so the board comes up in a known state.
        link.reset().await.map_err(ZagreusError::Device)?;

        let (accept_tx, accept_rx) = flume::unbounded();
        let (stop_tx, stop_rx) = flume::unbounded();
        compio::runtime::spawn(acceptor(listener, accept_tx, stop_rx)).detach();

        let (conn_tx, conn_rx) = flume::unbounded();
        let (dev_cmd_tx, dev_cmd_rx) = flume::unbounded();
        let (dev_ev_tx, dev_ev_rx) = flume::unbounded();
        actor::spawn_device(link, dev_ev_tx, dev_cmd_rx, cfg.buffer_size, cfg.device_poll);

        Ok(Self {
            open: true,
            session: ServerSession::new(cfg.backbuffer_max),
            conns: HashMap::new(),
            next_id: 0,
            cfg,
            accept_rx,
            stop_tx,
            conn_tx,
            conn_rx,
            dev_tx: dev_cmd_tx,
            dev_rx: dev_ev_rx,
        })
    }

    /// Whether the server is still accepting work.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Wait for one wake (bounded by `timeout`) and handle it.
    pub async fn serve_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        if !self.open {
            return Err(ZagreusError::Closed);
        }

        let wake = {
            let accept = self.accept_rx.recv_async().fuse();
            let conn = self.conn_rx.recv_async().fuse();
            let device = self.dev_rx.recv_async().fuse();
            let tick = async {
                match timeout {
                    Some(d) => compio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            }
            .fuse();
            futures::pin_mut!(accept, conn, device, tick);
            futures::select! {
                r = accept => match r {
                    Ok((stream, label)) => Wake::Accepted(stream, label),
                    Err(_) => Wake::ListenerGone,
                },
                c = conn => match c {
                    Ok(event) => Wake::Conn(event),
                    // We hold a sender clone, so this cannot disconnect.
                    Err(_) => Wake::Timeout,
                },
                d = device => match d {
                    Ok(event) => Wake::Device(event),
                    Err(_) => Wake::DeviceGone,
                },
                _ = tick => Wake::Timeout,
            }
        };

        match wake {
            Wake::Accepted(stream, label) => self.handle_accept(stream, label),
            Wake::ListenerGone => {
                error!("listener failed, shutting down");
                self.close();
            }
            Wake::Conn(ConnEvent::Bytes { id, bytes }) => {
                let actions = self.session.on_client_bytes(id, &bytes);
                self.apply(actions);
            }
            Wake::Conn(ConnEvent::Closed { id }) => self.close_client(id),
            Wake::Device(DeviceEvent::Data(data)) => {
                eprintln!("DEBUG serve_once Device::Data {} bytes", data.len());
                let action = self.session.on_device_bytes(&data);
                self.apply(Some(action));
            }
            Wake::Device(DeviceEvent::Failed(e)) => {
                error!(error = %e, "device failed, shutting down");
                self.close();
            }
            Wake::DeviceGone => {
                error!("device pump gone, shutting down");
                self.close();
            }
            Wake::Timeout => {}
        }
        Ok(())
    }

    /// Serve until the listener or device dies.
    pub async fn serve_forever(&mut self) -> Result<()> {
        while self.open {
            self.serve_once(None).await?;
        }
        Ok(())
    }

    /// Serve until no client has been connected for `idle`.
    pub async fn serve_until_idle(&mut self, idle: Duration) -> Result<()> {
        let mut last_active = Instant::now();
        while self.open {
            self.serve_once(Some(idle)).await?;
            let now = Instant::now();
            if !self.conns.is_empty() {
                last_active = now;
            }
            if now > last_active + idle {
                info!("server idle, exiting");
                self.close();
            }
        }
        Ok(())
    }

    /// Close every client, then the listener. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let _ = self.stop_tx.send(());
        // Snapshot: close_client mutates the registry.
        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        for id in ids {
            self.close_client(id);
        }
        let _ = self.dev_tx.send(DeviceCmd::Close);
        info!("server closed");
    }

    fn handle_accept(&mut self, stream: Stream, label: PeerLabel) {
        let id = self.next_id;
        self.next_id += 1;
        info!(%label, id, "connect");

        let (cmd_tx, cmd_rx) = flume::unbounded();
        // The replay goes into the FIFO before the actor can receive any
        // fan-out, which is what makes replay-then-live atomic.
        let replay = self.session.on_accept(id);
        if !replay.is_empty() {
            let _ = cmd_tx.send(ConnCmd::Send(replay));
        }
        actor::spawn_conn(id, stream, self.conn_tx.clone(), cmd_rx, self.cfg.buffer_size);
        self.conns.insert(id, ConnHandle { tx: cmd_tx, label });
    }

    fn apply(&mut self, actions: impl IntoIterator<Item = ServerAction>) {
        for action in actions {
            match action {
                ServerAction::Broadcast(wire) => self.broadcast(wire),
                ServerAction::DeviceWrite(data) => {
                    if self.dev_tx.send(DeviceCmd::Write(data)).is_err() {
                        error!("device pump gone, shutting down");
                        self.close();
                    }
                }
                ServerAction::ResetDevice => {
                    if self.dev_tx.send(DeviceCmd::Reset).is_err() {
                        error!("device pump gone, shutting down");
                        self.close();
                    }
                }
            }
        }
    }

    fn broadcast(&mut self, wire: Bytes) {
        let broken: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.tx.send(ConnCmd::Send(wire.clone())).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in broken {
            warn!(id, "send failed");
            self.close_client(id);
        }
    }

    fn close_client(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.remove(&id) {
            info!(label = %conn.label, id, "disconnect");
            let _ = conn.tx.send(ConnCmd::Close);
            self.session.on_client_gone(id);
        }
    }
}

/// Accept connections until told to stop or the listener fails.
async fn acceptor(
    listener: Listener,
    accepts: Sender<(Stream, PeerLabel)>,
    stop: Receiver<()>,
) {
    loop {
        let accepted = {
            let accept = listener.accept().fuse();
            let stopped = stop.recv_async().fuse();
            futures::pin_mut!(accept, stopped);
            futures::select! {
                r = accept => Some(r),
                _ = stopped => None,
            }
        };
        match accepted {
            Some(Ok((stream, label))) => {
                if accepts.send_async((stream, label)).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "accept failed");
                break;
            }
            None => break,
        }
    }
    listener.cleanup();
}
