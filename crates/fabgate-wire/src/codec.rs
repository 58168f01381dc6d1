use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::frame::{self, parse_header, Frame, HEADER_LEN};

/// `tokio_util` codec adapter for the printer frame format.
///
/// Decoding yields `Ok(None)` while a frame is still incomplete and at
/// most one frame per call. A malformed frame is an error for that
/// frame only; whether to drop the connection or hunt for the next
/// magic is the caller's policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None); // Need more data
        }

        let header = parse_header(&src[..HEADER_LEN])?;
        if src.len() < header.size {
            src.reserve(header.size - src.len());
            return Ok(None);
        }

        let mut taken = src.split_to(header.size);
        taken.advance(HEADER_LEN);

        Ok(Some(Frame {
            kind: header.kind,
            sequence: header.sequence,
            timestamp: header.timestamp,
            device_id: header.device_id,
            padding: header.padding,
            payload: taken.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        frame::encode(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_decode_incomplete_header() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"MA"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2); // nothing consumed
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let frame = Frame::single("dev-1", &b"abcdef"[..]);
        let wire = frame::pack(&frame).unwrap();

        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&wire[..wire.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[wire.len() - 2..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload.as_ref(), b"abcdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_one_frame_per_call() {
        let mut buf = BytesMut::new();
        frame::encode(&Frame::single("dev-1", &b"first"[..]), &mut buf).unwrap();
        frame::encode(&Frame::single("dev-2", &b"second"[..]), &mut buf).unwrap();

        let mut codec = FrameCodec;
        let f1 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(f1.device_id, "dev-1");
        let f2 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(f2.device_id, "dev-2");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_malformed_is_error() {
        let mut wire = frame::pack(&Frame::single("dev-1", &b"x"[..]))
            .unwrap()
            .to_vec();
        wire[1] = b'Z';
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&wire[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::BadMagic { offset: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_framed_stream_roundtrip() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (client, server) = tokio::io::duplex(4096);
        let mut tx = Framed::new(client, FrameCodec);
        let mut rx = Framed::new(server, FrameCodec);

        tx.send(Frame::single("dev-1", Bytes::from_static(b"one")))
            .await
            .unwrap();
        tx.send(Frame::single("dev-1", Bytes::from_static(b"two")))
            .await
            .unwrap();

        let first = rx.next().await.expect("stream should yield").unwrap();
        assert_eq!(first.payload.as_ref(), b"one");
        let second = rx.next().await.expect("stream should yield").unwrap();
        assert_eq!(second.payload.as_ref(), b"two");
    }
}
