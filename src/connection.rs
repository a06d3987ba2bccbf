//! Byte-stream ownership for the controller link.
//!
//! A [`Connection`] owns the physical transport: it writes newline-terminated
//! command lines and hands back received lines one at a time. It knows nothing
//! about command semantics; framing and dispatch live in
//! [`crate::protocol::Controller`], which takes the connection by value.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, trace};
use serialport::{SerialPort, SerialPortInfo};

use crate::constants::READ_POLL_INTERVAL;
use crate::error::Result;

/// A line-oriented transport to the controller.
///
/// `read_line` must return `Ok(None)` after an idle poll interval instead of
/// blocking indefinitely, so the link thread can interleave dispatch work
/// with reads. Any `Err` from either method is treated as a lost connection
/// by the dispatcher.
pub trait Connection: Send + 'static {
    /// Write one command line; the newline terminator is appended here.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Return the next complete received line, or `None` if nothing arrived
    /// within the poll interval. Carriage returns are stripped.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Whether the underlying stream is still usable.
    fn is_connected(&self) -> bool;

    /// Release the underlying stream.
    fn close(&mut self);
}

/// [`Connection`] over a physical serial port.
pub struct SerialConnection {
    port: Option<Box<dyn SerialPort>>,
    read_buf: Vec<u8>,
    pending_lines: VecDeque<String>,
}

impl SerialConnection {
    /// Open a serial port with the given baud rate.
    ///
    /// The port read timeout is set to the link poll interval; controller
    /// boards talk 8N1, which is the serialport default.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_POLL_INTERVAL)
            .open()?;
        debug!("opened {} at {} baud", port_name, baud_rate);

        Ok(SerialConnection {
            port: Some(port),
            read_buf: Vec::new(),
            pending_lines: VecDeque::new(),
        })
    }

    /// List serial ports available on this machine.
    pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }

    /// Override the poll interval of an open port.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(interval)?;
        }
        Ok(())
    }

    /// Split complete lines out of the raw byte buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.read_buf.drain(..=pos).collect();
            raw.pop(); // the newline itself
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            let line = String::from_utf8_lossy(&raw).into_owned();
            trace!("rx line: {:?}", line);
            self.pending_lines.push_back(line);
        }
    }
}

impl Connection for SerialConnection {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
        trace!("tx line: {:?}", line);
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pending_lines.pop_front() {
            return Ok(Some(line));
        }
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;

        let mut chunk = [0u8; 256];
        match port.read(&mut chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                self.drain_lines();
                Ok(self.pending_lines.pop_front())
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_lines_strips_cr_and_splits() {
        let mut conn = SerialConnection {
            port: None,
            read_buf: b"ok\r\n$1=42\npartial".to_vec(),
            pending_lines: VecDeque::new(),
        };
        conn.drain_lines();
        assert_eq!(conn.pending_lines.pop_front().as_deref(), Some("ok"));
        assert_eq!(conn.pending_lines.pop_front().as_deref(), Some("$1=42"));
        assert!(conn.pending_lines.is_empty());
        assert_eq!(conn.read_buf, b"partial");
    }

    #[test]
    fn drain_lines_keeps_empty_lines() {
        let mut conn = SerialConnection {
            port: None,
            read_buf: b"\r\nok\n".to_vec(),
            pending_lines: VecDeque::new(),
        };
        conn.drain_lines();
        assert_eq!(conn.pending_lines.pop_front().as_deref(), Some(""));
        assert_eq!(conn.pending_lines.pop_front().as_deref(), Some("ok"));
    }
}
