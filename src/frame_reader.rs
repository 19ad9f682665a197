//! Pulls whole frames out of a continuous, sometimes-corrupted byte stream.
//!
//! A [`FrameReader`] owns a private buffer for one [`Channel`]. Bytes from the
//! transport are appended to it and frames are cut off the front. Corruption
//! is assumed to be local: when a candidate frame turns out to be bad, only
//! its four header bytes are dropped and the scan resumes right after them.

use crate::frame::{self, Channel, DecodeResult, Frame, MARKER_LEN};
use crate::transport::{Transport, TransportError};
use log::{debug, trace};
use std::time::{Duration, Instant};

// A header may be split across two reads, so up to three bytes of a buffer
// with no header in it could still be the start of one.
const SPLIT_HEADER_KEEP: usize = MARKER_LEN - 1;

const READ_CHUNK: usize = 256;

const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Resynchronizing frame extractor for one channel.
#[derive(Debug, Clone)]
pub struct FrameReader {
    channel: Channel,
    buffer: Vec<u8>,
    dropped: u64,
}

impl FrameReader {
    /// A reader with an empty buffer.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            buffer: Vec::new(),
            dropped: 0,
        }
    }

    /// The channel this reader looks for.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes discarded while hunting for frames since this reader was made.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Appends freshly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Forgets everything buffered so far.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn discard(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.drain(..n);
        self.dropped += n as u64;
    }

    /// Cuts the next complete frame off the buffer, if there is one.
    pub fn extract(&mut self) -> Option<Frame> {
        let header = self.channel.header();
        loop {
            let Some(pos) = self
                .buffer
                .windows(header.len())
                .position(|window| window == header)
            else {
                if self.buffer.len() > SPLIT_HEADER_KEEP {
                    let excess = self.buffer.len() - SPLIT_HEADER_KEEP;
                    trace!("{:?}: no header in {} bytes", self.channel, excess);
                    self.discard(excess);
                }
                return None;
            };

            if pos > 0 {
                trace!("{:?}: skipping {} bytes before header", self.channel, pos);
                self.discard(pos);
            }

            match frame::decode(self.channel, &self.buffer) {
                DecodeResult::Frame(frame, used) => {
                    self.buffer.drain(..used);
                    return Some(frame);
                }
                DecodeResult::NeedMoreData => return None,
                DecodeResult::Invalid => {
                    debug!("{:?}: invalid frame, resynchronizing", self.channel);
                    self.discard(MARKER_LEN);
                }
            }
        }
    }

    /// Reads from `transport` until a frame is complete or `timeout` elapses.
    ///
    /// `Ok(None)` means the device had nothing to say within the window; it
    /// is the normal outcome of an idle poll, not an error.
    pub fn next_frame<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.extract() {
                return Ok(Some(frame));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let n = transport.read(&mut chunk)?;
            if n == 0 {
                spin_sleep::sleep(IDLE_BACKOFF.min(deadline - now));
            } else {
                self.feed(&chunk[..n]);
            }
        }
    }

    /// A lazy stream of frames read from `transport`. The iterator ends the
    /// first time a whole `timeout` passes without a complete frame, and
    /// yields an error (then ends) if the transport fails.
    pub fn frames<'a, T: Transport + ?Sized>(
        &'a mut self,
        transport: &'a mut T,
        timeout: Duration,
    ) -> Frames<'a, T> {
        Frames {
            reader: self,
            transport,
            timeout,
            done: false,
        }
    }
}

/// Iterator returned by [`FrameReader::frames`].
pub struct Frames<'a, T: Transport + ?Sized> {
    reader: &'a mut FrameReader,
    transport: &'a mut T,
    timeout: Duration,
    done: bool,
}

impl<'a, T: Transport + ?Sized> Iterator for Frames<'a, T> {
    type Item = Result<Frame, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_frame(&mut *self.transport, self.timeout) {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
