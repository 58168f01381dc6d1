use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Header length in bytes. Every frame starts with exactly this much.
pub const HEADER_LEN: usize = 64;

/// Minimum total frame length: the header plus at least one payload byte.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

/// Device identifier field width.
pub const DEVICE_ID_LEN: usize = 40;

/// Reserved padding field width.
pub const PADDING_LEN: usize = 8;

/// Maximum payload length representable by the u16 total-size field.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - HEADER_LEN;

/// Fixed header bytes as (offset, value). Parsing checks them in this
/// order and packing emits them from the same table, so the two
/// directions cannot drift apart.
const MAGIC_BYTES: [(usize, u8); 7] = [
    (0, b'M'),
    (1, b'A'),
    (4, 5),
    (5, 1),
    (6, 2),
    (7, 5),
    (8, b'F'),
];

/// Field offsets within the 64-byte header. Shared by `parse` and
/// `encode`.
mod off {
    pub const SIZE: usize = 2;
    pub const KIND: usize = 9;
    pub const SEQUENCE: usize = 10;
    pub const TIMESTAMP: usize = 12;
    pub const DEVICE_ID: usize = 16;
    pub const PADDING: usize = 56;
    pub const PAYLOAD: usize = 64;
}

/// Fragmentation role of a frame within a logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// A complete logical message in one frame.
    Single = 0xc0,
    /// First fragment of a multi-frame message.
    MultiBegin = 0xc1,
    /// Middle fragment.
    MultiAppend = 0xc2,
    /// Final fragment; completes the message.
    MultiFinish = 0xc3,
}

impl FrameKind {
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0xc0 => Ok(FrameKind::Single),
            0xc1 => Ok(FrameKind::MultiBegin),
            0xc2 => Ok(FrameKind::MultiAppend),
            0xc3 => Ok(FrameKind::MultiFinish),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// One wire frame of the printer command channel.
///
/// Header layout (all integers little-endian):
///
/// ```text
/// off  len  field
///  0    1   magic  'M'
///  1    1   magic  'A'
///  2    2   total size (u16), header included, >= 65
///  4    4   magic  5 1 2 5
///  8    1   magic  'F'
///  9    1   frame kind (0xc0..0xc3)
/// 10    2   sequence (u16)
/// 12    4   timestamp (u32, unix seconds)
/// 16   40   device id, ascii, NUL-padded
/// 56    8   padding, zero on the wire
/// 64    n   payload (n = size - 64, >= 1)
/// ```
///
/// The total size is never stored on the value; `encode` derives it from
/// the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Fragment counter within a logical message. Singles carry 1.
    pub sequence: u16,
    /// Sender clock, unix seconds.
    pub timestamp: u32,
    /// Device identifier with trailing NUL padding stripped.
    pub device_id: String,
    /// Reserved header bytes, preserved verbatim so that re-encoding a
    /// parsed frame reproduces the input byte for byte.
    pub padding: [u8; PADDING_LEN],
    /// Opaque payload. The device's trailing checksum rides inside it
    /// and is never split off or verified here.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(
        kind: FrameKind,
        sequence: u16,
        device_id: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            sequence,
            timestamp: unix_now(),
            device_id: device_id.into(),
            padding: [0; PADDING_LEN],
            payload: payload.into(),
        }
    }

    /// A complete single-frame message.
    pub fn single(device_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Single, 1, device_id, payload)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Current unix time as the wire's u32 timestamp.
pub(crate) fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

/// All header fields except the payload, as extracted by `parse_header`.
pub(crate) struct Header {
    pub size: usize,
    pub kind: FrameKind,
    pub sequence: u16,
    pub timestamp: u32,
    pub device_id: String,
    pub padding: [u8; PADDING_LEN],
}

/// Validate and extract the header. `buf` must hold at least
/// `HEADER_LEN` bytes; the caller has already checked that.
pub(crate) fn parse_header(buf: &[u8]) -> Result<Header> {
    for (offset, expected) in MAGIC_BYTES {
        if buf[offset] != expected {
            return Err(FrameError::BadMagic {
                offset,
                expected,
                found: buf[offset],
            });
        }
    }

    let size = u16::from_le_bytes([buf[off::SIZE], buf[off::SIZE + 1]]);
    if (size as usize) < MIN_FRAME_LEN {
        return Err(FrameError::SizeBelowMinimum {
            size,
            min: MIN_FRAME_LEN as u16,
        });
    }

    let kind = FrameKind::from_wire(buf[off::KIND])?;
    let sequence = u16::from_le_bytes([buf[off::SEQUENCE], buf[off::SEQUENCE + 1]]);
    let timestamp = u32::from_le_bytes(
        buf[off::TIMESTAMP..off::TIMESTAMP + 4]
            .try_into()
            .unwrap(),
    );

    let raw_id = &buf[off::DEVICE_ID..off::PADDING];
    let id_end = raw_id.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let device_id = std::str::from_utf8(&raw_id[..id_end])
        .map_err(|_| FrameError::DeviceIdNotAscii)?;
    if !device_id.is_ascii() {
        return Err(FrameError::DeviceIdNotAscii);
    }

    let padding: [u8; PADDING_LEN] = buf[off::PADDING..off::PAYLOAD].try_into().unwrap();
    if padding != [0; PADDING_LEN] {
        // Tolerated, but worth surfacing: the field is zero on every
        // known firmware.
        tracing::warn!(device = %device_id, ?padding, "nonzero header padding");
    }

    Ok(Header {
        size: size as usize,
        kind,
        sequence,
        timestamp,
        device_id: device_id.to_owned(),
        padding,
    })
}

/// Parse one frame from the front of `buf`.
///
/// Returns the frame and the unconsumed remainder; frames arrive
/// back-to-back in a single read, so callers loop on the remainder.
/// Fails with [`FrameError::Truncated`] when the buffer holds fewer
/// bytes than the header's size field declares.
pub fn parse(buf: &[u8]) -> Result<(Frame, &[u8])> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: MIN_FRAME_LEN,
            available: buf.len(),
        });
    }

    let header = parse_header(buf)?;
    if buf.len() < header.size {
        return Err(FrameError::Truncated {
            needed: header.size,
            available: buf.len(),
        });
    }

    let payload = Bytes::copy_from_slice(&buf[off::PAYLOAD..header.size]);
    let frame = Frame {
        kind: header.kind,
        sequence: header.sequence,
        timestamp: header.timestamp,
        device_id: header.device_id,
        padding: header.padding,
        payload,
    };
    Ok((frame, &buf[header.size..]))
}

/// Encode a frame into `dst`.
///
/// Left inverse of [`parse`]: for every well-formed frame,
/// `parse(encoded) == frame`, and re-encoding a parsed frame reproduces
/// the input bytes exactly (padding included).
pub fn encode(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    if frame.payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    if frame.device_id.len() > DEVICE_ID_LEN {
        return Err(FrameError::DeviceIdTooLong {
            len: frame.device_id.len(),
            max: DEVICE_ID_LEN,
        });
    }
    if !frame.device_id.is_ascii() {
        return Err(FrameError::DeviceIdNotAscii);
    }

    let size = HEADER_LEN + frame.payload.len();
    let mut header = [0u8; HEADER_LEN];
    for (offset, value) in MAGIC_BYTES {
        header[offset] = value;
    }
    header[off::SIZE..off::SIZE + 2].copy_from_slice(&(size as u16).to_le_bytes());
    header[off::KIND] = frame.kind as u8;
    header[off::SEQUENCE..off::SEQUENCE + 2].copy_from_slice(&frame.sequence.to_le_bytes());
    header[off::TIMESTAMP..off::TIMESTAMP + 4].copy_from_slice(&frame.timestamp.to_le_bytes());
    header[off::DEVICE_ID..off::DEVICE_ID + frame.device_id.len()]
        .copy_from_slice(frame.device_id.as_bytes());
    header[off::PADDING..off::PAYLOAD].copy_from_slice(&frame.padding);

    dst.reserve(size);
    dst.put_slice(&header);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Encode a frame into a fresh buffer.
pub fn pack(frame: &Frame) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(frame.wire_size());
    encode(frame, &mut buf)?;
    Ok(buf.freeze())
}
