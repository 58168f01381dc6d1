use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::error::AssemblyError;
use crate::frame::{unix_now, Frame, FrameKind, MAX_PAYLOAD};

/// A reassembled application message for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalMessage {
    pub device_id: String,
    pub payload: Bytes,
}

/// Per-device reassembly of fragmented logical messages.
///
/// One assembler serves one frame stream. Buffers are keyed by device
/// id, so interleaved fragment runs from different devices never
/// interfere, and an error on one device leaves every other device's
/// state untouched.
#[derive(Debug, Default)]
pub struct Assembler {
    open: HashMap<String, BytesMut>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices with an open (incomplete) fragment buffer.
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    /// Feed one frame; returns the completed message when the frame
    /// closes one.
    pub fn accept(&mut self, frame: Frame) -> Result<Option<LogicalMessage>, AssemblyError> {
        match frame.kind {
            FrameKind::Single => {
                if self.open.remove(&frame.device_id).is_some() {
                    tracing::warn!(
                        device = %frame.device_id,
                        "single frame while a fragment buffer was open; discarding the buffer"
                    );
                }
                Ok(Some(LogicalMessage {
                    device_id: frame.device_id,
                    payload: frame.payload,
                }))
            }
            FrameKind::MultiBegin => {
                let buf = BytesMut::from(frame.payload.as_ref());
                if self.open.insert(frame.device_id.clone(), buf).is_some() {
                    tracing::warn!(
                        device = %frame.device_id,
                        "fragment run restarted before the previous one finished"
                    );
                }
                Ok(None)
            }
            FrameKind::MultiAppend => {
                let buf = self.open.get_mut(&frame.device_id).ok_or_else(|| {
                    AssemblyError::NoOpenBuffer {
                        device: frame.device_id.clone(),
                        kind: frame.kind,
                    }
                })?;
                buf.extend_from_slice(&frame.payload);
                Ok(None)
            }
            FrameKind::MultiFinish => {
                let mut buf = self.open.remove(&frame.device_id).ok_or_else(|| {
                    AssemblyError::NoOpenBuffer {
                        device: frame.device_id.clone(),
                        kind: frame.kind,
                    }
                })?;
                buf.extend_from_slice(&frame.payload);
                Ok(Some(LogicalMessage {
                    device_id: frame.device_id,
                    payload: buf.freeze(),
                }))
            }
        }
    }
}

/// Split a payload into the frame run that carries it: one `Single`
/// when it fits `limit`, otherwise `MultiBegin` / `MultiAppend`* /
/// `MultiFinish` with sequence numbers ascending from 1. All frames
/// share one timestamp. An empty payload still produces one `Single`,
/// which `encode` then rejects.
pub fn split_payload(device_id: &str, payload: Bytes, limit: usize) -> Vec<Frame> {
    debug_assert!(limit > 0 && limit <= MAX_PAYLOAD);
    let timestamp = unix_now();

    if payload.len() <= limit {
        let mut frame = Frame::single(device_id, payload);
        frame.timestamp = timestamp;
        return vec![frame];
    }

    let mut frames = Vec::with_capacity(payload.len().div_ceil(limit));
    for (i, start) in (0..payload.len()).step_by(limit).enumerate() {
        let end = (start + limit).min(payload.len());
        let kind = if i == 0 {
            FrameKind::MultiBegin
        } else if end == payload.len() {
            FrameKind::MultiFinish
        } else {
            FrameKind::MultiAppend
        };
        let mut frame = Frame::new(kind, (i + 1) as u16, device_id, payload.slice(start..end));
        frame.timestamp = timestamp;
        frames.push(frame);
    }
    frames
}
