//! The byte link between the host and the presence sensor.
//!
//! Everything above this module talks to a [`Transport`], which is a duplex
//! byte stream with a bounded-timeout read. In production that is a UART
//! opened with [serial2], in tests it is a [`MockTransport`] that replays
//! scripted bytes and records what was written.

use log::{debug, info};
use serial2::SerialPort;
use std::{
    collections::VecDeque,
    fmt,
    io::{self, ErrorKind},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Everything that can go wrong while talking to the link itself.
#[derive(Debug)]
pub enum TransportError {
    /// The operating system reported an error on the port.
    Io(io::Error),
    /// The link is gone (port closed, device unplugged, lock poisoned).
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(error) => write!(f, "transport io error: {}", error),
            TransportError::Disconnected => write!(f, "transport disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A duplex byte stream to the sensor.
pub trait Transport: Send {
    /// Number of inbound bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Reads into `buf`, blocking for at most the transport's read timeout.
    /// Returns `Ok(0)` when the timeout elapses with nothing to read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes the whole buffer to the link.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Throws away any inbound bytes that have not been read yet.
    fn clear_input(&mut self) -> Result<(), TransportError>;
}

/// A transport shared between the background reader and the command engine.
/// Whoever holds the lock owns the link for the duration.
pub type SharedTransport<T> = Arc<Mutex<T>>;

/// Wraps a transport so it can be shared between threads.
pub fn share<T: Transport>(transport: T) -> SharedTransport<T> {
    Arc::new(Mutex::new(transport))
}

/// A UART connection to the sensor, configured 8N1.
pub struct SerialTransport {
    port: SerialPort,
    path: PathBuf,
    // Bytes pulled off the port by `bytes_available` but not yet handed out.
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Opens `path` at `baud_rate`, with reads bounded by `read_timeout`.
    pub fn open(
        path: impl Into<PathBuf>,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let path = path.into();
        let mut port = SerialPort::open(&path, baud_rate)?;
        port.set_read_timeout(read_timeout)?;
        info!(
            "Opened serial port {} at {} baud",
            path.display(),
            baud_rate
        );
        Ok(Self {
            port,
            path,
            pending: Vec::new(),
            read_timeout,
        })
    }

    /// The serial ports the operating system knows about.
    pub fn available_ports() -> Result<Vec<PathBuf>, TransportError> {
        Ok(SerialPort::available_ports()?)
    }

    /// The device path this transport was opened on.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_port(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for SerialTransport {
    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        // serial2 has no FIONREAD wrapper, so poll with a zero timeout and
        // park whatever arrives in `pending`.
        self.port.set_read_timeout(Duration::ZERO)?;
        let mut chunk = [0u8; 256];
        let polled = self.read_port(&mut chunk);
        self.port.set_read_timeout(self.read_timeout)?;
        let n = polled?;
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(self.pending.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        self.read_port(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        debug!("Discarding {} pending bytes", self.pending.len());
        self.pending.clear();
        self.port.discard_input_buffer()?;
        Ok(())
    }
}

/// A scripted in-memory transport.
///
/// Inbound bytes are queued with [`MockTransport::inject`]. A reply can also
/// be registered per command frame with [`MockTransport::reply_to`]: when a
/// write matches, the reply is queued as if the device had answered it.
/// Clones share the same state, so a test can keep a handle while the code
/// under test owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    inbound: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    replies: VecDeque<(Vec<u8>, Vec<u8>)>,
    clears: usize,
    broken: bool,
}

impl MockTransport {
    /// An empty, connected transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the code under test to read.
    pub fn inject(&self, data: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.inbound.extend(data);
        }
    }

    /// When exactly `request` is written, queue `response` for reading.
    /// Registered replies are consumed in order, once each.
    pub fn reply_to(&self, request: &[u8], response: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.replies.push_back((request.to_vec(), response.to_vec()));
        }
    }

    /// Every buffer passed to `write_all`, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .map(|inner| inner.written.clone())
            .unwrap_or_default()
    }

    /// How many times the input buffer was cleared.
    pub fn clears(&self) -> usize {
        self.inner.lock().map(|inner| inner.clears).unwrap_or(0)
    }

    /// Makes every further operation fail, as if the cable were pulled.
    pub fn break_link(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.broken = true;
        }
    }

    /// Undoes [`MockTransport::break_link`].
    pub fn restore_link(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.broken = false;
        }
    }

    fn with_inner<R>(
        &self,
        f: impl FnOnce(&mut MockInner) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TransportError::Disconnected)?;
        if inner.broken {
            return Err(TransportError::Disconnected);
        }
        f(&mut inner)
    }
}

impl Transport for MockTransport {
    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.with_inner(|inner| Ok(inner.inbound.len()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.with_inner(|inner| {
            let n = inner.inbound.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(inner.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        })
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.with_inner(|inner| {
            inner.written.push(data.to_vec());
            let matches = inner
                .replies
                .front()
                .map(|(request, _)| request.as_slice() == data)
                .unwrap_or(false);
            if matches {
                if let Some((_, response)) = inner.replies.pop_front() {
                    inner.inbound.extend(response);
                }
            }
            Ok(())
        })
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.with_inner(|inner| {
            inner.inbound.clear();
            inner.clears += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reads_what_was_injected() {
        let mut transport = MockTransport::new();
        transport.inject(&[1, 2, 3, 4, 5]);
        assert_eq!(transport.bytes_available().unwrap(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(transport.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn mock_replies_only_to_the_matching_write() {
        let mut transport = MockTransport::new();
        transport.reply_to(&[0xAA], &[0x55]);

        transport.write_all(&[0xBB]).unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);

        transport.write_all(&[0xAA]).unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 1);
        assert_eq!(transport.written(), vec![vec![0xBB], vec![0xAA]]);
    }

    #[test]
    fn clear_drops_unread_bytes() {
        let mut transport = MockTransport::new();
        transport.inject(&[9; 16]);
        transport.clear_input().unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);
        assert_eq!(transport.clears(), 1);
    }

    #[test]
    fn broken_link_fails_every_operation() {
        let mut transport = MockTransport::new();
        let handle = transport.clone();
        handle.break_link();

        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.read(&mut buf),
            Err(TransportError::Disconnected)
        ));
        assert!(transport.write_all(&[1]).is_err());
    }
}
