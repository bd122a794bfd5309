//! The real board: a serial line plus a GPIO reset wire.
//!
//! Reads are non-blocking: the link reports how many bytes the kernel
//! is holding and takes at most that many, which is what lets the
//! device pump poll it without ever parking the runtime thread.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rppal::gpio::{Gpio, OutputPin};
use serialport::SerialPort;
use tracing::{debug, info};

use zagreus_core::config::RESET_PULSE;
use zagreus_core::device::DeviceLink;

/// The Z80 single-board computer on the other end of the wires.
pub struct Z80Link {
    port: Box<dyn SerialPort>,
    reset_pin: OutputPin,
}

impl Z80Link {
    /// Open the serial port (8N1 at `baud`) and claim the reset GPIO
    /// (BCM numbering), leaving the reset line deasserted.
    pub fn open(serial: &Path, baud: u32, reset_pin: u8) -> io::Result<Self> {
        let port = serialport::new(serial.to_string_lossy(), baud)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let pin = Gpio::new()
            .and_then(|gpio| gpio.get(reset_pin))
            .map(rppal::gpio::Pin::into_output_low)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        info!(serial = %serial.display(), baud, reset_pin, "board attached");
        Ok(Self {
            port,
            reset_pin: pin,
        })
    }
}

#[async_trait(?Send)]
impl DeviceLink for Z80Link {
    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let pending = self
            .port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))? as usize;
        if pending == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; pending.min(max)];
        let n = match self.port.read(&mut buf) {
            Ok(n) => n,
            // A race against the UART draining; just try again later.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e),
        };
        buf.truncate(n);
        Ok(buf.into())
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        debug!(len = data.len(), "serial write");
        self.port.write_all(&data)
    }

    async fn reset(&mut self) -> io::Result<()> {
        info!("resetting board");
        self.reset_pin.set_high();
        compio::time::sleep(RESET_PULSE).await;
        self.reset_pin.set_low();
        Ok(())
    }
}
