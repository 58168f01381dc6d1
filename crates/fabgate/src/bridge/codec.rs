use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use super::BridgeError;

/// Control channel: the hello, control documents, and their replies.
pub const CHANNEL_CONTROL: u16 = 0;
/// Decoded printer command envelopes.
pub const CHANNEL_COMMANDS: u16 = 1;
/// Raw camera frames.
pub const CHANNEL_VIDEO: u16 = 2;
/// Connectivity edges.
pub const CHANNEL_STATUS: u16 = 3;

const MAGIC: [u8; 2] = *b"FG";
const HEADER_LEN: usize = 8;
/// Payload cap. Camera frames are the largest traffic and stay well
/// under this.
pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// One bridge frame: a channel tag and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeFrame {
    pub channel: u16,
    pub payload: Bytes,
}

impl BridgeFrame {
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// A frame carrying `doc` serialized as JSON.
    pub fn json(channel: u16, doc: &Value) -> Result<Self, BridgeError> {
        Ok(Self::new(channel, serde_json::to_vec(doc)?))
    }
}

/// `tokio_util` codec for the bridge wire format: magic `b"FG"`, payload
/// length as u32 LE, channel as u16 LE, then the payload.
///
/// Decoding yields `Ok(None)` while a frame is still incomplete and at
/// most one frame per call. Bridge connections are dropped on the first
/// malformed frame; there is no resynchronization.
#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeCodec;

impl Decoder for BridgeCodec {
    type Item = BridgeFrame;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BridgeFrame>, BridgeError> {
        if src.len() < HEADER_LEN {
            return Ok(None); // Need more data
        }

        if src[0..2] != MAGIC {
            return Err(BridgeError::BadMagic {
                found: [src[0], src[1]],
            });
        }
        let len = u32::from_le_bytes(src[2..6].try_into().unwrap()) as usize;
        if len > MAX_PAYLOAD {
            return Err(BridgeError::FrameTooLarge {
                size: len,
                max: MAX_PAYLOAD,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let channel = u16::from_le_bytes(src[6..8].try_into().unwrap());
        let mut taken = src.split_to(HEADER_LEN + len);
        taken.advance(HEADER_LEN);

        Ok(Some(BridgeFrame {
            channel,
            payload: taken.freeze(),
        }))
    }
}

impl Encoder<BridgeFrame> for BridgeCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: BridgeFrame, dst: &mut BytesMut) -> Result<(), BridgeError> {
        if item.payload.len() > MAX_PAYLOAD {
            return Err(BridgeError::FrameTooLarge {
                size: item.payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.extend_from_slice(&MAGIC);
        dst.extend_from_slice(&(item.payload.len() as u32).to_le_bytes());
        dst.extend_from_slice(&item.channel.to_le_bytes());
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_incomplete_header() {
        let mut codec = BridgeCodec;
        let mut buf = BytesMut::from(&b"FG\x04"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3); // nothing consumed
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut codec = BridgeCodec;
        let mut wire = BytesMut::new();
        codec
            .encode(BridgeFrame::new(CHANNEL_VIDEO, &b"abcdef"[..]), &mut wire)
            .unwrap();

        let mut buf = BytesMut::from(&wire[..wire.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[wire.len() - 2..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.channel, CHANNEL_VIDEO);
        assert_eq!(decoded.payload.as_ref(), b"abcdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_one_frame_per_call() {
        let mut codec = BridgeCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(BridgeFrame::new(CHANNEL_CONTROL, &b"first"[..]), &mut buf)
            .unwrap();
        codec
            .encode(BridgeFrame::new(CHANNEL_STATUS, &b"second"[..]), &mut buf)
            .unwrap();

        let f1 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(f1.channel, CHANNEL_CONTROL);
        let f2 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(f2.channel, CHANNEL_STATUS);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_bad_magic_is_error() {
        let mut codec = BridgeCodec;
        let mut buf = BytesMut::from(&b"ZG\x00\x00\x00\x00\x00\x00"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BridgeError::BadMagic { found: [b'Z', b'G'] })
        ));
    }

    #[test]
    fn test_oversized_length_is_error() {
        let mut codec = BridgeCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&(MAX_PAYLOAD as u32 + 1).to_le_bytes());
        buf.extend_from_slice(&CHANNEL_VIDEO.to_le_bytes());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BridgeError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_json_frames_round_trip() {
        let doc = serde_json::json!({"topic": "video"});
        let frame = BridgeFrame::json(CHANNEL_CONTROL, &doc).unwrap();

        let mut codec = BridgeCodec;
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        let parsed: Value = serde_json::from_slice(&decoded.payload).unwrap();
        assert_eq!(parsed, doc);
    }
}
