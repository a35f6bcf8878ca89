//! Stream framing for byte-stream transports (TCP, UNIX sockets).
//!
//! Two formats are supported:
//!
//! - **msgpack**: peers write bare MessagePack values back to back. The
//!   decoder walks the marker bytes to find where one value ends without
//!   decoding it.
//! - **length_prefixed**: `u32` big-endian length followed by the payload.
//!
//! Both formats enforce a maximum frame size so a hostile length field can
//! never make the reader buffer without bound.

use std::io;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

// ── FrameFormat ──────────────────────────────────────────────────

/// How messages are delimited on a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Self-delimiting MessagePack values.
    #[default]
    #[serde(rename = "msgpack")]
    MsgPack,
    /// 4-byte big-endian length prefix.
    #[serde(rename = "length_prefixed")]
    LengthPrefixed,
}

// ── Value extent scanning ────────────────────────────────────────

/// Where the first MessagePack value in a buffer ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Extent {
    /// The first `n` bytes hold one complete value.
    Complete(usize),
    /// More bytes are needed.
    Incomplete,
    /// A reserved marker was found; the first `n` bytes are garbage.
    Corrupt(usize),
    /// The value cannot fit within the frame limit.
    TooLarge,
}

fn read_len(buf: &[u8], at: u64, width: u64) -> Option<u64> {
    let start = usize::try_from(at).ok()?;
    let end = usize::try_from(at + width).ok()?;
    let bytes = buf.get(start..end)?;
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Find the extent of the first MessagePack value in `buf`.
///
/// Every pending value occupies at least one byte, so the scan can reject
/// oversized containers as soon as their element count is known.
pub(crate) fn value_extent(buf: &[u8], max: usize) -> Extent {
    let max = max as u64;
    let mut pos: u64 = 0;
    let mut pending: u64 = 1;

    while pending > 0 {
        let Some(&marker) = buf.get(pos as usize) else {
            return Extent::Incomplete;
        };

        macro_rules! len {
            ($width:expr) => {
                match read_len(buf, pos + 1, $width) {
                    Some(n) => n,
                    None => return Extent::Incomplete,
                }
            };
        }

        // (bytes occupied by this value excluding children, child count)
        let (size, children): (u64, u64) = match marker {
            0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => (1, 0),
            0x80..=0x8f => (1, 2 * u64::from(marker & 0x0f)),
            0x90..=0x9f => (1, u64::from(marker & 0x0f)),
            0xa0..=0xbf => (1 + u64::from(marker & 0x1f), 0),
            0xc1 => return Extent::Corrupt(pos as usize + 1),
            0xc4 | 0xd9 => (2 + len!(1), 0),
            0xc5 | 0xda => (3 + len!(2), 0),
            0xc6 | 0xdb => (5 + len!(4), 0),
            0xc7 => (3 + len!(1), 0),
            0xc8 => (4 + len!(2), 0),
            0xc9 => (6 + len!(4), 0),
            0xca => (5, 0),
            0xcb => (9, 0),
            0xcc | 0xd0 => (2, 0),
            0xcd | 0xd1 => (3, 0),
            0xce | 0xd2 => (5, 0),
            0xcf | 0xd3 => (9, 0),
            0xd4 => (3, 0),
            0xd5 => (4, 0),
            0xd6 => (6, 0),
            0xd7 => (10, 0),
            0xd8 => (18, 0),
            0xdc => (3, len!(2)),
            0xdd => (5, len!(4)),
            0xde => (3, 2 * len!(2)),
            0xdf => (5, 2 * len!(4)),
        };

        pos += size;
        pending = pending - 1 + children;
        if pos + pending > max {
            return Extent::TooLarge;
        }
    }

    if pos > buf.len() as u64 {
        Extent::Incomplete
    } else {
        Extent::Complete(pos as usize)
    }
}

// ── MsgPackFrameCodec ────────────────────────────────────────────

/// Splits a stream of back-to-back MessagePack values into frames.
#[derive(Debug, Clone, Copy)]
pub struct MsgPackFrameCodec {
    max_frame_size: usize,
}

impl MsgPackFrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for MsgPackFrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match value_extent(src, self.max_frame_size) {
            Extent::Complete(n) => Ok(Some(src.split_to(n).freeze())),
            Extent::Corrupt(n) => {
                tracing::debug!(bytes = n, "reserved msgpack marker in stream");
                Ok(Some(src.split_to(n).freeze()))
            }
            Extent::Incomplete => Ok(None),
            Extent::TooLarge => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame exceeds {} bytes", self.max_frame_size),
            )),
        }
    }
}

impl Encoder<Bytes> for MsgPackFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame of {} bytes exceeds {}",
                    item.len(),
                    self.max_frame_size
                ),
            ));
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}

// ── FrameCodec ───────────────────────────────────────────────────

/// The framing codec selected by [`FrameFormat`].
#[derive(Debug)]
pub enum FrameCodec {
    MsgPack(MsgPackFrameCodec),
    LengthPrefixed(LengthDelimitedCodec),
}

impl FrameCodec {
    pub fn new(format: FrameFormat, max_frame_size: usize) -> Self {
        match format {
            FrameFormat::MsgPack => Self::MsgPack(MsgPackFrameCodec::new(max_frame_size)),
            FrameFormat::LengthPrefixed => Self::LengthPrefixed(
                LengthDelimitedCodec::builder()
                    .length_field_length(4)
                    .big_endian()
                    .max_frame_length(max_frame_size)
                    .new_codec(),
            ),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::MsgPack(codec) => codec.decode(src),
            Self::LengthPrefixed(codec) => Ok(codec.decode(src)?.map(BytesMut::freeze)),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Self::MsgPack(codec) => codec.encode(item, dst),
            Self::LengthPrefixed(codec) => codec.encode(item, dst),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
