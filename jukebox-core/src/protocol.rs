//! Binary LED frame protocol and sink status lines.
//!
//! Every frame on the wire is
//!
//! ```text
//! 0xAA 0x55 | led_count: u16 LE | R,G,B * led_count | checksum: u16 LE
//! ```
//!
//! where the checksum is the sum of all payload bytes modulo 65536. A sink
//! must discard a frame whose checksum does not match and wait for the next
//! header.

use crate::error::{CoreError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER: [u8; 2] = [0xAA, 0x55];

/// Header, length and checksum bytes around each payload
pub const FRAME_OVERHEAD: usize = 6;

/// Sum of payload bytes modulo 65536
#[must_use]
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Wrap an RGB payload into a wire frame.
///
/// # Errors
///
/// Returns `FrameEncode` if the payload is not whole RGB triplets or holds
/// more LEDs than the `u16` length field can describe.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() % 3 != 0 {
        return Err(CoreError::FrameEncode {
            reason: format!("payload of {} bytes is not RGB triplets", payload.len()),
        });
    }
    let led_count = u16::try_from(payload.len() / 3).map_err(|_| CoreError::FrameEncode {
        reason: format!("{} LEDs exceed {}", payload.len() / 3, u16::MAX),
    })?;

    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.put_slice(&HEADER);
    frame.put_u16_le(led_count);
    frame.put_slice(payload);
    frame.put_u16_le(checksum(payload));
    Ok(frame.freeze())
}

/// Result of feeding bytes to a [`FrameDecoder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame whose checksum matched
    Frame { led_count: u16, payload: Bytes },
    /// A complete frame that was dropped
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// Incremental receiver following the sink contract: find a header, read
/// exactly `led_count * 3` bytes, verify, and only then hand the frame out.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, or `None` until more bytes arrive
    pub fn next_frame(&mut self) -> Option<Decoded> {
        let Some(start) = self.buf.windows(2).position(|w| w == HEADER) else {
            // Keep a trailing 0xAA that may start the next header
            let keep = usize::from(self.buf.last() == Some(&HEADER[0]));
            let drop = self.buf.len() - keep;
            self.buf.advance(drop);
            return None;
        };
        self.buf.advance(start);

        if self.buf.len() < 4 {
            return None;
        }
        let led_count = u16::from_le_bytes([self.buf[2], self.buf[3]]);
        let payload_len = usize::from(led_count) * 3;
        if self.buf.len() < payload_len + FRAME_OVERHEAD {
            return None;
        }

        let mut frame = self.buf.split_to(payload_len + FRAME_OVERHEAD);
        frame.advance(4);
        let payload = frame.split_to(payload_len).freeze();
        let expected = frame.get_u16_le();
        let actual = checksum(&payload);
        if expected == actual {
            Some(Decoded::Frame { led_count, payload })
        } else {
            Some(Decoded::ChecksumMismatch { expected, actual })
        }
    }
}

/// A text line reported by a sink on its back channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    TotalLeds(u32),
    StripSegments(Vec<u32>),
    DataPins(Vec<u32>),
    FrameOk,
    ChecksumError(String),
    Other(String),
}

impl SinkMessage {
    /// Parse one line, ignoring surrounding whitespace
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Some(value) = line.strip_prefix("TOTAL_LEDS=")
            && let Ok(n) = value.trim().parse()
        {
            return Some(Self::TotalLeds(n));
        }
        if let Some(value) = line.strip_prefix("STRIP_SEGMENTS=")
            && let Some(list) = parse_list(value)
        {
            return Some(Self::StripSegments(list));
        }
        if let Some(value) = line.strip_prefix("DATA_PINS=")
            && let Some(list) = parse_list(value)
        {
            return Some(Self::DataPins(list));
        }
        if line.contains("Frame OK") {
            return Some(Self::FrameOk);
        }
        if line.contains("Checksum error") {
            return Some(Self::ChecksumError(line.to_string()));
        }
        Some(Self::Other(line.to_string()))
    }

    /// Whether this line carries configuration worth showing to users
    #[must_use]
    pub const fn is_info(&self) -> bool {
        matches!(
            self,
            Self::TotalLeds(_) | Self::StripSegments(_) | Self::DataPins(_)
        )
    }
}

impl std::fmt::Display for SinkMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |list: &[u32]| {
            list.iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            Self::TotalLeds(n) => write!(f, "TOTAL_LEDS={n}"),
            Self::StripSegments(list) => write!(f, "STRIP_SEGMENTS={}", join(list)),
            Self::DataPins(list) => write!(f, "DATA_PINS={}", join(list)),
            Self::FrameOk => f.write_str("Frame OK"),
            Self::ChecksumError(line) | Self::Other(line) => f.write_str(line),
        }
    }
}

fn parse_list(value: &str) -> Option<Vec<u32>> {
    value
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect()
}
