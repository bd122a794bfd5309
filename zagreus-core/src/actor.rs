//! Split-pump actors.
//!
//! One connection == one reader task + one writer task over a cloned
//! stream. The pumps never share mutable state; everything moves over
//! `flume` channels to the hub loop, which is the only consumer.
//!
//! The device gets the same treatment, with one twist: `DeviceLink::read`
//! is non-blocking by contract, so the device pump waits on its command
//! channel with a short poll tick and reads the line between wakes.
//! Commands (writes, resets) are applied the moment they arrive; a
//! pending chunk of board output is at most one tick away.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError};
use futures::FutureExt;
use tracing::{debug, trace};

use crate::device::DeviceLink;
use crate::net::Stream;

/// Identifies one client connection within a server.
pub type ConnId = u64;

/// Events from a connection to the hub
#[derive(Debug)]
pub enum ConnEvent {
    /// Received bytes from the peer
    Bytes { id: ConnId, bytes: Bytes },
    /// Connection hit EOF or an error
    Closed { id: ConnId },
}

/// Commands from the hub to a connection's writer
#[derive(Debug)]
pub enum ConnCmd {
    /// Send raw wire bytes
    Send(Bytes),
    /// Close the socket
    Close,
}

/// Events from the device pump to the hub
#[derive(Debug)]
pub enum DeviceEvent {
    /// The board produced output
    Data(Bytes),
    /// The serial line or reset wire failed; fatal
    Failed(io::Error),
}

/// Commands from the hub to the device pump
#[derive(Debug)]
pub enum DeviceCmd {
    /// Write bytes to the board
    Write(Bytes),
    /// Pulse the reset line
    Reset,
    /// Stop the pump
    Close,
}

/// Spawn the reader/writer pair for one accepted connection.
///
/// Queued `Send` commands are flushed in FIFO order, so anything queued
/// at accept time (the backbuffer replay) goes out before any later
/// fan-out.
pub fn spawn_conn(
    id: ConnId,
    stream: Stream,
    events: Sender<ConnEvent>,
    cmds: Receiver<ConnCmd>,
    read_size: usize,
) {
    let reader = stream.clone();
    compio::runtime::spawn(read_pump(id, reader, events, read_size)).detach();
    compio::runtime::spawn(write_pump(id, stream, cmds)).detach();
}

async fn read_pump(id: ConnId, mut stream: Stream, events: Sender<ConnEvent>, read_size: usize) {
    loop {
        match stream.read_chunk(read_size).await {
            Ok(bytes) if bytes.is_empty() => {
                let _ = events.send(ConnEvent::Closed { id });
                break;
            }
            Ok(bytes) => {
                trace!(id, len = bytes.len(), "conn read");
                if events.send(ConnEvent::Bytes { id, bytes }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(id, error = %e, "conn read failed");
                let _ = events.send(ConnEvent::Closed { id });
                break;
            }
        }
    }
}

async fn write_pump(id: ConnId, mut stream: Stream, cmds: Receiver<ConnCmd>) {
    while let Ok(cmd) = cmds.recv_async().await {
        match cmd {
            ConnCmd::Send(bytes) => {
                if bytes.is_empty() {
                    continue;
                }
                if let Err(e) = stream.write_all(bytes).await {
                    debug!(id, error = %e, "conn write failed");
                    break;
                }
            }
            ConnCmd::Close => break,
        }
    }
    // Wake the reader sharing this fd so both pumps wind down together.
    stream.shutdown_now();
}

/// Spawn the device pump around a [`DeviceLink`].
pub fn spawn_device(
    link: Box<dyn DeviceLink>,
    events: Sender<DeviceEvent>,
    cmds: Receiver<DeviceCmd>,
    read_size: usize,
    poll: Duration,
) {
    compio::runtime::spawn(device_pump(link, events, cmds, read_size, poll)).detach();
}

async fn device_pump(
    mut link: Box<dyn DeviceLink>,
    events: Sender<DeviceEvent>,
    cmds: Receiver<DeviceCmd>,
    read_size: usize,
    poll: Duration,
) {
    loop {
        // Wait for a command or the next poll tick.
        let first = {
            let recv = cmds.recv_async().fuse();
            let tick = compio::time::sleep(poll).fuse();
            futures::pin_mut!(recv, tick);
            futures::select! {
                cmd = recv => Some(cmd),
                _ = tick => None,
            }
        };
        match first {
            Some(Ok(cmd)) => {
                if !apply_cmd(&mut link, cmd, &events).await {
                    return;
                }
            }
            Some(Err(_)) => return, // hub gone
            None => {}
        }

        // Drain anything else queued before touching the line.
        loop {
            match cmds.try_recv() {
                Ok(cmd) => {
                    if !apply_cmd(&mut link, cmd, &events).await {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match link.read(read_size).await {
            Ok(data) if !data.is_empty() => {
                trace!(len = data.len(), "device read");
                if events.send(DeviceEvent::Data(data)).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(DeviceEvent::Failed(e));
                return;
            }
        }
    }
}

/// Apply one command; false means the pump should stop.
async fn apply_cmd(
    link: &mut Box<dyn DeviceLink>,
    cmd: DeviceCmd,
    events: &Sender<DeviceEvent>,
) -> bool {
    let res = match cmd {
        DeviceCmd::Write(bytes) => link.write(bytes).await,
        DeviceCmd::Reset => {
            debug!("pulsing device reset");
            link.reset().await
        }
        DeviceCmd::Close => return false,
    };
    if let Err(e) = res {
        let _ = events.send(DeviceEvent::Failed(e));
        return false;
    }
    true
}
