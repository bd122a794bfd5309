//! `zagreus`: the terminal client.
//!
//! Attaches to a running `zagreusd` (or spawns one on the default Unix
//! socket) and turns this terminal into the board's console. Ctrl-A
//! opens the local menu; Ctrl-A ? lists the bindings.

use std::error::Error;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use zagreus::client::{connect_or_spawn, BackgroundOpts, Client};
use zagreus::{config, logging, Endpoint};
use zagreus_core::net::Stream;

#[derive(Debug, Parser)]
#[command(name = "zagreus", version, about = "Terminal client for the shared Z80 console")]
struct Args {
    /// hostname to connect to
    #[arg(long)]
    host: Option<String>,

    /// port number to connect to
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// unix socket to connect to
    #[arg(short, long)]
    unix_socket: Option<PathBuf>,

    /// BCM pin number connected to the z80 reset line (for the spawned server)
    #[arg(short, long, default_value_t = 4)]
    reset_pin: u8,

    /// serial port connected to the z80 (for the spawned server)
    #[arg(short, long, default_value = "/dev/ttyS0")]
    serial_port: PathBuf,

    /// baud rate for the z80 serial port (for the spawned server)
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_if_env();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("zagreus: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    compio::runtime::Runtime::new()?.block_on(async move {
        let stream = if let Some(path) = &args.unix_socket {
            Stream::connect(&Endpoint::Ipc(path.clone())).await?
        } else if let Some(host) = &args.host {
            let addr = (host.as_str(), args.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| format!("cannot resolve {}:{}", host, args.port))?;
            Stream::connect(&Endpoint::Tcp(addr)).await?
        } else {
            connect_or_spawn(&BackgroundOpts {
                reset_pin: args.reset_pin,
                serial_port: args.serial_port.clone(),
                baud: args.baud,
            })
            .await?
        };

        let mut client = Client::new(stream)?;
        client.run().await?;
        Ok(())
    })
}
