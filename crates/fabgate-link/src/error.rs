use std::time::Duration;

/// Errors that can occur on the printer link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No session is currently established.
    #[error("link is not connected")]
    NotConnected,

    /// Establishing a session did not complete within the allowed window.
    #[error("connect timed out after {after:?}")]
    ConnectTimeout { after: Duration },

    /// The transport failed to establish a session.
    #[error("connect failed: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The peer closed the session.
    #[error("session closed by peer")]
    SessionClosed,

    /// The outbound command queue is full.
    #[error("outbound command queue is full")]
    QueueFull,

    /// An I/O error occurred on the session.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
