use bytes::Bytes;
use fabgate_link::LinkEvent;
use fabgate_wire::LogicalMessage;

/// The broadcast message type shared by every gateway service.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A complete logical message from the printer command channel.
    Command(LogicalMessage),
    /// One camera video frame.
    Video(Bytes),
    /// Link lifecycle and raw session traffic.
    Link(LinkEvent),
}

impl From<LinkEvent> for GatewayEvent {
    fn from(event: LinkEvent) -> Self {
        GatewayEvent::Link(event)
    }
}
