//! `zagreusd`: the shared-console daemon.
//!
//! Owns the serial port and the reset GPIO, listens on TCP or a Unix
//! socket, and multiplexes every attached client onto the one board.

use std::error::Error;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use zagreus::hardware::Z80Link;
use zagreus::server::Server;
use zagreus::{config, daemon, logging, Endpoint, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "zagreusd", version, about = "Shared serial console server for a Z80 board")]
struct Args {
    /// hostname to bind to
    #[arg(long, default_value = config::DEFAULT_HOST)]
    host: String,

    /// port number to bind to
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// unix socket to bind to (preferred over TCP when given)
    #[arg(short, long)]
    unix_socket: Option<PathBuf>,

    /// exit when the last client has been gone for a while
    #[arg(short = 'x', long)]
    exit_when_idle: bool,

    /// daemonize after start
    #[arg(short, long)]
    daemonize: bool,

    /// path to pid file
    #[arg(long, default_value = config::PID_FILE)]
    pid_file: PathBuf,

    /// BCM pin number connected to the z80 reset line
    #[arg(short, long, default_value_t = 4)]
    reset_pin: u8,

    /// serial port connected to the z80
    #[arg(short, long, default_value = "/dev/ttyS0")]
    serial_port: PathBuf,

    /// baud rate for the z80 serial port
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let pid_file = absolutize(&args.pid_file)?;
    let serial_port = absolutize(&args.serial_port)?;
    let endpoint = match &args.unix_socket {
        Some(path) => Endpoint::Ipc(absolutize(path)?),
        None => {
            let addr = (args.host.as_str(), args.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| format!("cannot resolve {}:{}", args.host, args.port))?;
            Endpoint::Tcp(addr)
        }
    };

    // Fork before the runtime exists; io_uring does not survive it.
    if args.daemonize {
        daemon::daemonize(&pid_file)?;
    } else {
        daemon::write_pid_file(&pid_file)?;
    }

    let link = Z80Link::open(&serial_port, args.baud, args.reset_pin)?;

    compio::runtime::Runtime::new()?.block_on(async move {
        let mut server =
            Server::bind(&endpoint, Box::new(link), ServerConfig::default()).await?;
        if args.exit_when_idle {
            server.serve_until_idle(config::IDLE_TIMEOUT).await?;
        } else {
            server.serve_forever().await?;
        }
        Ok(())
    })
}

fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
