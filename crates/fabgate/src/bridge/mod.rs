//! Local client bridge.
//!
//! Gateway data leaves the process over a Unix domain socket speaking a
//! small framed protocol ([`codec::BridgeCodec`]). A connection serves
//! exactly one topic, announced by a JSON hello as the first frame;
//! command, video, and status topics fan gateway streams out to the
//! client, while the control topic accepts key-valued documents that
//! mutate the running services.

pub mod client;
pub mod codec;
pub mod listener;

pub use client::BridgeClient;
pub use codec::{
    BridgeCodec, BridgeFrame, CHANNEL_COMMANDS, CHANNEL_CONTROL, CHANNEL_STATUS, CHANNEL_VIDEO,
};
pub use listener::BridgeListener;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bad bridge magic {found:02x?}")]
    BadMagic { found: [u8; 2] },

    #[error("bridge frame of {size} bytes exceeds the {max} byte cap")]
    FrameTooLarge { size: usize, max: usize },

    #[error("first frame must be a control-channel topic hello")]
    BadHello,

    #[error("unknown topic {0:?}")]
    UnknownTopic(String),

    /// A topic's precondition was unmet at accept time. Logged locally;
    /// the peer only sees its connection close.
    #[error("topic {topic} refused: {reason}")]
    AuthorizationDenied {
        topic: &'static str,
        reason: &'static str,
    },

    #[error("bridge document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Service(#[from] fabgate_service::ServiceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One bridge data lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Decoded printer command traffic, as JSON envelopes.
    Commands,
    /// Raw camera frames.
    Video,
    /// Link connectivity edges.
    Status,
    /// Bidirectional control documents.
    Ctrl,
}

impl Topic {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "commands" => Some(Topic::Commands),
            "video" => Some(Topic::Video),
            "status" => Some(Topic::Status),
            "ctrl" => Some(Topic::Ctrl),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Topic::Commands => "commands",
            Topic::Video => "video",
            Topic::Status => "status",
            Topic::Ctrl => "ctrl",
        }
    }

    /// The channel this topic's data frames ride on.
    pub fn channel(self) -> u16 {
        match self {
            Topic::Commands => CHANNEL_COMMANDS,
            Topic::Video => CHANNEL_VIDEO,
            Topic::Status => CHANNEL_STATUS,
            Topic::Ctrl => CHANNEL_CONTROL,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
