//! Wire codec for the printer command channel.
//!
//! Every frame starts with a fixed 64-byte header:
//! - magic bytes `M` `A` ... `5 1 2 5` `F` for stream validation
//! - a little-endian u16 total size (header included, minimum 65)
//! - a fragmentation kind, sequence counter, and sender timestamp
//! - a 40-byte NUL-padded ascii device identifier
//!
//! The payload stays opaque: the device's trailing checksum is carried
//! through untouched. Fragmented messages (`MultiBegin` /
//! `MultiAppend` / `MultiFinish`) are stitched back together per device
//! by the [`Assembler`].

pub mod assembly;
pub mod codec;
pub mod error;
pub mod frame;
pub mod opcode;

pub use assembly::{split_payload, Assembler, LogicalMessage};
pub use codec::FrameCodec;
pub use error::{AssemblyError, FrameError, Result};
pub use frame::{
    encode, pack, parse, Frame, FrameKind, DEVICE_ID_LEN, HEADER_LEN, MAX_PAYLOAD, MIN_FRAME_LEN,
    PADDING_LEN,
};
pub use opcode::Opcode;
