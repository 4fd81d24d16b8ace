//! Channel abstraction
//!
//! Everything above this layer talks to a [`SerialChannel`], so the same read
//! loops drive a real port or the scripted [`MockChannel`](super::mock::MockChannel).

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte-oriented, blocking serial channel
pub trait SerialChannel: Read + Write + Send {
    /// Set the per-read timeout
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Current per-read timeout
    fn timeout(&self) -> Duration;

    /// Discard unread input
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Discard unsent output
    fn clear_output_buffer(&mut self) -> io::Result<()>;

    /// Number of bytes received and not yet read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Read one byte, or `None` if nothing arrived within the read timeout
    fn read_unit(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Serial port wrapper implementing [`SerialChannel`]
pub struct PortChannel {
    port: Box<dyn SerialPort>,
}

impl PortChannel {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for PortChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for PortChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialChannel for PortChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(io::Error::other)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }
}
