//! Printer link supervision.
//!
//! Models the connection to a printer as a supervised session:
//! - [`LinkTransport`] / [`LinkSession`] are the seam traits an actual
//!   transport implements (P2P, simulator, test doubles).
//! - [`LinkSupervisor`] is a [`fabgate_service::Service`] worker that keeps
//!   exactly one session alive: it reconnects with backoff, watches for
//!   traffic stalls, and broadcasts [`LinkEvent`]s to the rest of the
//!   gateway.
//! - [`LinkHandle`] is the clonable control surface other services use to
//!   read connection status and queue outbound [`SessionCommand`]s.

pub mod error;
pub mod session;
pub mod status;
pub mod supervisor;

pub use error::{LinkError, Result};
pub use session::{
    LinkEvent, LinkSession, LinkTransport, SessionCommand, SessionFrame, VIDEO_CHANNEL,
};
pub use status::{ConnectionInfo, Edge, EdgeDetector, LinkHandle, LinkState};
pub use supervisor::{LinkConfig, LinkSupervisor};
