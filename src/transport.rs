//! The byte link to the sensor

use std::io::{self, Read, Write};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::{config::SerialSettings, error::Result};

/// A duplex byte stream. Writes block until handed to the OS, reads are
/// expected to be preceded by a [`bytes_available`](Transport::bytes_available) poll.
pub trait Transport: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// How many bytes can be read right now without blocking
    fn bytes_available(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open the port at 115200 8N1 and throw away anything stale in the buffers
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let port = settings.builder().open()?;
        port.clear(ClearBuffer::All)?;
        info!(path = %settings.path, baud = SerialSettings::BAUD_RATE, "Serial port opened");
        Ok(Self {
            path: settings.path.clone(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "Serial port closed");
        }
    }
}
