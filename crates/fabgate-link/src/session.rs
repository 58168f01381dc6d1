use bytes::Bytes;
use futures_core::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;

/// Session channel carrying camera video frames.
pub const VIDEO_CHANNEL: u8 = 1;

/// One inbound unit of traffic from an established session.
///
/// The channel byte routes the payload: channel [`VIDEO_CHANNEL`] carries
/// raw camera frames, everything else is printer chatter that upper layers
/// inspect as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFrame {
    pub channel: u8,
    pub payload: Bytes,
}

impl SessionFrame {
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Whether this frame carries camera video.
    pub fn is_video(&self) -> bool {
        self.channel == VIDEO_CHANNEL
    }
}

/// Outbound commands a session knows how to deliver.
///
/// The on-wire encoding is the session implementation's business; this
/// enum is the typed seam between the gateway services and whatever
/// protocol the transport speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Keepalive ping.
    Heartbeat,
    /// Free-form JSON control message.
    Json(Value),
    /// Begin a live camera stream with the given settings.
    StartLive { settings: Value },
    /// Stop the live camera stream.
    CloseLive,
    /// Toggle the chamber light.
    LightState(bool),
    /// Select the live stream quality mode.
    LiveMode(u8),
    /// Announce an inbound file transfer.
    FileBegin { id: String, name: String, size: u64 },
    /// One chunk of file data at the given offset.
    FileChunk { pos: u64, data: Bytes },
    /// Finish the file transfer.
    FileEnd,
}

/// Link lifecycle events broadcast to the rest of the gateway.
///
/// `Up` and `Down` are edges: each is published exactly once per real
/// transition, never repeated while the level holds.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A session was established.
    Up,
    /// The session was torn down.
    Down,
    /// Inbound traffic from the session.
    Frame(SessionFrame),
}

/// An established session with the printer.
///
/// `recv` resolving to `Ok(None)` means the peer closed the session
/// cleanly; errors mean it broke. `close` is idempotent and releases
/// every resource the session holds.
pub trait LinkSession: Send {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<SessionFrame>>>;

    fn send(&mut self, command: SessionCommand) -> BoxFuture<'_, Result<()>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;

    /// Human-readable remote endpoint, for status displays.
    fn endpoint(&self) -> String;
}

/// Factory for sessions. The supervisor calls `connect` on every
/// (re)connect attempt; each call must yield a fresh session.
pub trait LinkTransport: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn LinkSession>>>;
}
