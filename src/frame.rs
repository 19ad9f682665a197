//! Wire frames exchanged with the 24GHz presence sensor.
//!
//! Every frame on the link has the same shape, the only thing telling the two
//! channels apart is the marker at either end:
//!
//! ```text
//! HEADER(4) | LENGTH:u16-LE | PAYLOAD(LENGTH) | FOOTER(4)
//! ```
//!
//! - The data channel (periodic telemetry) uses `F4 F3 F2 F1` / `F8 F7 F6 F5`.
//! - The command channel (configuration requests and their ACKs) uses
//!   `FD FC FB FA` / `04 03 02 01`, and its payload always starts with a
//!   16-bit little-endian command word.
//!
//! Decoding is done with [nom] streaming parsers so that a short buffer is
//! reported as [`DecodeResult::NeedMoreData`] rather than as garbage.

use nom::{
    bytes::streaming::{tag, take},
    number::streaming::le_u16,
    IResult,
};
use std::fmt;

/// Header and footer markers are always four bytes long.
pub const MARKER_LEN: usize = 4;

/// Bytes before the payload: header plus the length field.
pub const PREAMBLE_LEN: usize = MARKER_LEN + 2;

/// The sensor never sends payloads anywhere near this long; a larger length
/// field means we locked onto a header pattern inside garbage.
pub const MAX_PAYLOAD_LEN: usize = 1024;

const DATA_HEADER: [u8; 4] = [0xF4, 0xF3, 0xF2, 0xF1];
const DATA_FOOTER: [u8; 4] = [0xF8, 0xF7, 0xF6, 0xF5];
const COMMAND_HEADER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];
const COMMAND_FOOTER: [u8; 4] = [0x04, 0x03, 0x02, 0x01];

/// A payload that cannot be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Longer than [`MAX_PAYLOAD_LEN`]; the decoder would reject the frame.
    PayloadTooLong {
        /// Length of the rejected payload.
        len: usize,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::PayloadTooLong { len } => write!(
                f,
                "payload of {} bytes exceeds the {} byte frame limit",
                len, MAX_PAYLOAD_LEN
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// Which of the two framings a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Periodic target reports.
    Data,
    /// Configuration commands and acknowledgements.
    Command,
}

impl Channel {
    /// The four bytes that open a frame on this channel.
    pub fn header(self) -> &'static [u8] {
        match self {
            Channel::Data => &DATA_HEADER,
            Channel::Command => &COMMAND_HEADER,
        }
    }

    /// The four bytes that close a frame on this channel.
    pub fn footer(self) -> &'static [u8] {
        match self {
            Channel::Data => &DATA_FOOTER,
            Channel::Command => &COMMAND_FOOTER,
        }
    }
}

/// One complete, validated frame. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    channel: Channel,
    payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame around `payload` without touching the wire.
    pub fn new(channel: Channel, payload: Vec<u8>) -> Self {
        Self { channel, payload }
    }

    /// The channel this frame was framed for.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Everything between the length field and the footer.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The leading command word of a command-channel payload.
    pub fn command_word(&self) -> Option<u16> {
        match (self.channel, self.payload.get(..2)) {
            (Channel::Command, Some(word)) => Some(u16::from_le_bytes([word[0], word[1]])),
            _ => None,
        }
    }

    /// The command-channel payload after the command word.
    pub fn command_body(&self) -> &[u8] {
        match self.channel {
            Channel::Command => self.payload.get(2..).unwrap_or(&[]),
            Channel::Data => &[],
        }
    }

    /// Serializes the frame back into wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.channel, &self.payload)
    }
}

/// The outcome of trying to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame, and how many bytes of the buffer it used.
    Frame(Frame, usize),
    /// The buffer is a valid prefix of a frame, but the frame is not all there.
    NeedMoreData,
    /// The buffer does not start with a valid frame for this channel.
    Invalid,
}

/// Frames `payload` for `channel`. Payloads the decoder would refuse are
/// refused here too.
pub fn encode(channel: Channel, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong { len });
    }
    let mut out = Vec::with_capacity(PREAMBLE_LEN + payload.len() + MARKER_LEN);
    out.extend_from_slice(channel.header());
    // Fits: bounded by MAX_PAYLOAD_LEN above.
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(channel.footer());
    Ok(out)
}

/// Builds a command frame: the length field covers the command word as well
/// as `data`.
pub fn encode_command(command_word: u16, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.extend_from_slice(&command_word.to_le_bytes());
    payload.extend_from_slice(data);
    encode(Channel::Command, &payload)
}

fn parse_frame(channel: Channel, input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, _) = tag(channel.header())(input)?;
    let (input, len) = le_u16(input)?;
    if usize::from(len) > MAX_PAYLOAD_LEN {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (input, payload) = take(len)(input)?;
    let (input, _) = tag(channel.footer())(input)?;
    Ok((input, payload))
}

/// Decodes a single frame that starts at `buffer[0]`. Never panics: anything
/// malformed comes back as [`DecodeResult::Invalid`].
pub fn decode(channel: Channel, buffer: &[u8]) -> DecodeResult {
    match parse_frame(channel, buffer) {
        Ok((rest, payload)) => DecodeResult::Frame(
            Frame::new(channel, payload.to_vec()),
            buffer.len() - rest.len(),
        ),
        Err(nom::Err::Incomplete(_)) => DecodeResult::NeedMoreData,
        Err(_) => DecodeResult::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_enable_config() {
        // The enable-configuration request straight out of the sensor manual.
        let bytes = encode_command(0x00FF, &[0x01, 0x00]).unwrap();
        assert_eq!(
            bytes,
            vec![
                0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0xFF, 0x00, 0x01, 0x00, 0x04, 0x03, 0x02,
                0x01
            ]
        );
    }

    #[test]
    fn command_round_trip() {
        let data = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00];
        let bytes = encode_command(0x0060, &data).unwrap();

        match decode(Channel::Command, &bytes) {
            DecodeResult::Frame(frame, used) => {
                assert_eq!(used, bytes.len());
                assert_eq!(frame.command_word(), Some(0x0060));
                assert_eq!(frame.command_body(), &data);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn empty_payload_round_trip() {
        let bytes = encode(Channel::Data, &[]).unwrap();
        assert_eq!(bytes.len(), PREAMBLE_LEN + MARKER_LEN);
        assert_eq!(
            decode(Channel::Data, &bytes),
            DecodeResult::Frame(Frame::new(Channel::Data, vec![]), bytes.len())
        );
    }

    #[test]
    fn short_buffers_need_more_data() {
        let bytes = encode_command(0x00FE, &[]).unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(
                decode(Channel::Command, &bytes[..cut]),
                DecodeResult::NeedMoreData,
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn wrong_footer_is_invalid() {
        let mut bytes = encode(Channel::Data, &[0x02, 0xAA, 0x00]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert_eq!(decode(Channel::Data, &bytes), DecodeResult::Invalid);
    }

    #[test]
    fn other_channel_is_invalid() {
        let bytes = encode(Channel::Data, &[0x02, 0xAA]).unwrap();
        assert_eq!(decode(Channel::Command, &bytes), DecodeResult::Invalid);
    }

    #[test]
    fn absurd_length_is_invalid() {
        let mut bytes = Vec::from(Channel::Data.header());
        bytes.extend_from_slice(&0xFFFFu16.to_le_bytes());
        assert_eq!(decode(Channel::Data, &bytes), DecodeResult::Invalid);
    }

    #[test]
    fn trailing_bytes_are_left_alone() {
        let mut bytes = encode(Channel::Data, &[1, 2, 3]).unwrap();
        let frame_len = bytes.len();
        bytes.extend_from_slice(&[0xF4, 0xF3]);
        match decode(Channel::Data, &bytes) {
            DecodeResult::Frame(frame, used) => {
                assert_eq!(used, frame_len);
                assert_eq!(frame.payload(), &[1, 2, 3]);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn data_frames_have_no_command_word() {
        let frame = Frame::new(Channel::Data, vec![0xFF, 0x01]);
        assert_eq!(frame.command_word(), None);
        assert!(frame.command_body().is_empty());
    }

    #[test]
    fn largest_payload_round_trips() {
        let payload = vec![0x5A; MAX_PAYLOAD_LEN];
        let bytes = encode(Channel::Data, &payload).unwrap();
        match decode(Channel::Data, &bytes) {
            DecodeResult::Frame(frame, used) => {
                assert_eq!(used, bytes.len());
                assert_eq!(frame.payload(), payload.as_slice());
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn oversized_payload_is_refused() {
        assert_eq!(
            encode(Channel::Data, &[0x5A; MAX_PAYLOAD_LEN + 1]),
            Err(FrameError::PayloadTooLong {
                len: MAX_PAYLOAD_LEN + 1
            })
        );
        // The command word counts towards the limit.
        assert!(encode_command(0x0060, &[0x5A; MAX_PAYLOAD_LEN - 2]).is_ok());
        assert_eq!(
            encode_command(0x0060, &[0x5A; 1100]),
            Err(FrameError::PayloadTooLong { len: 1102 })
        );
        // Well past what the length field can even hold.
        assert!(encode(Channel::Command, &vec![0; 70_000]).is_err());
        assert!(Frame::new(Channel::Data, vec![0; MAX_PAYLOAD_LEN + 1])
            .to_bytes()
            .is_err());
    }
}
