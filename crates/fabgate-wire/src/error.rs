use crate::frame::FrameKind;

/// Errors raised while parsing or packing wire frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("bad magic byte at offset {offset}: expected {expected:#04x}, found {found:#04x}")]
    BadMagic {
        offset: usize,
        expected: u8,
        found: u8,
    },
    #[error("frame size {size} below minimum {min}")]
    SizeBelowMinimum { size: u16, min: u16 },
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("empty payload (every frame carries at least one payload byte)")]
    EmptyPayload,
    #[error("device id too long ({len} bytes, max {max})")]
    DeviceIdTooLong { len: usize, max: usize },
    #[error("device id is not ascii")]
    DeviceIdNotAscii,
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised while reassembling fragmented logical messages.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("{kind:?} fragment for device {device:?} without an open buffer")]
    NoOpenBuffer { device: String, kind: FrameKind },
}
