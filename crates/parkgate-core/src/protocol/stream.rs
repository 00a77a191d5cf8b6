//! Controller transport
//!
//! The session writes commands on one end of the transport while the reader
//! thread polls the other, so a transport must hand out a second handle on
//! the same line.

use serialport::SerialPort;
use std::io::{self, Read, Write};

/// Byte transport underneath a controller session (a serial port in
/// production, an in-memory loopback in tests)
pub trait CommunicationChannel: Read + Write + Send {
    /// Drop whatever is buffered in either direction before a session starts
    fn discard_buffers(&mut self) -> io::Result<()>;

    /// Independent handle on the same line for the reader thread
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;

    /// Bytes ready to read without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Transport name for logs
    fn name(&self) -> String;
}

/// Controller link over a `serialport` handle
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

fn to_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn discard_buffers(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::All).map_err(to_io)
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port = self.port.try_clone().map_err(to_io)?;
        Ok(Box::new(SerialChannel::new(port)))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(to_io)
    }

    fn name(&self) -> String {
        self.port
            .name()
            .unwrap_or_else(|| "controller port".to_string())
    }
}
