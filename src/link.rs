use std::fmt;
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crate::proto::{CMD_ACK, CMD_REQUEST_FRAME, CMD_RESEND, CMD_TIME_SYNC};

/// Per-read timeout expected on the underlying port.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Node wake-up latency between the trigger byte and the first response.
const WAKE_DELAY: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 256;

/// Transport failures on the serial link.
#[derive(Debug)]
pub enum LinkError {
    Io(io::Error),
    /// Time-sync acknowledgement was missing or malformed.
    SyncRejected(Vec<u8>),
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        LinkError::Io(err)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Io(err) => write!(f, "serial I/O error: {}", err),
            LinkError::SyncRejected(response) if response.is_empty() => {
                write!(f, "time sync not acknowledged, no response")
            }
            LinkError::SyncRejected(response) => {
                write!(f, "time sync not acknowledged, got {}", format_bytes(response))
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// Exclusive handle on the half-duplex link to the sensor node. The polling
/// loop and the time-sync command both go through `&mut self`, so writes to
/// the link can never interleave.
pub struct NodeLink<P> {
    port: P,
}

impl<P: Read + Write> NodeLink<P> {
    /// Wrap an opened port. The port must carry a bounded read timeout
    /// (`READ_TIMEOUT`); a timed-out read ends a drain, it is not an error.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// One request/response exchange: send the trigger byte, give the node
    /// time to wake, then drain everything it sends. An empty buffer means
    /// the node had nothing queued.
    pub fn request_frame(&mut self) -> Result<Vec<u8>, LinkError> {
        self.port.write_all(&[CMD_REQUEST_FRAME])?;
        thread::sleep(WAKE_DELAY);
        let response = self.drain()?;
        if !response.is_empty() {
            log::debug!("Link RX: {}", format_bytes(&response));
        }
        Ok(response)
    }

    /// Acknowledge a verified frame so the node advances its queue.
    pub fn acknowledge(&mut self) -> Result<(), LinkError> {
        self.port.write_all(&[CMD_ACK])?;
        Ok(())
    }

    /// Ask the node to retransmit the frame it just sent.
    pub fn request_resend(&mut self) -> Result<(), LinkError> {
        self.port.write_all(&[CMD_RESEND])?;
        Ok(())
    }

    /// Discard any stale bytes left on the link after an accept/reject
    /// decision, so the next cycle starts from a clean buffer.
    pub fn flush_input(&mut self) -> Result<(), LinkError> {
        let stale = self.drain()?;
        if !stale.is_empty() {
            log::debug!("Flushed {} stale bytes from link", stale.len());
        }
        Ok(())
    }

    /// Push wall-clock time to the node: command byte, LE seconds, LE
    /// microseconds-of-second, then wait for a single ack byte. Any other
    /// response is surfaced to the caller.
    pub fn sync_time(&mut self, secs: u32, micros: u32) -> Result<(), LinkError> {
        let mut command = [0u8; 9];
        command[0] = CMD_TIME_SYNC;
        command[1..5].copy_from_slice(&secs.to_le_bytes());
        command[5..9].copy_from_slice(&micros.to_le_bytes());
        self.port.write_all(&command)?;
        let response = self.drain()?;
        if response == [CMD_ACK] {
            Ok(())
        } else {
            Err(LinkError::SyncRejected(response))
        }
    }

    #[cfg(test)]
    pub(crate) fn port(&self) -> &P {
        &self.port
    }

    /// Read until the link reports no more bytes within the per-read
    /// timeout, concatenating everything into one buffer.
    fn drain(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut message = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => message.extend_from_slice(&chunk[..count]),
                Err(err) if is_timeout(&err) => break,
                Err(err) => return Err(LinkError::Io(err)),
            }
        }
        Ok(message)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Hex-format a byte run for logging.
fn format_bytes(bytes: &[u8]) -> String {
    let mut line = String::with_capacity(bytes.len() * 3);
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{:02X}", byte);
    }
    line
}
