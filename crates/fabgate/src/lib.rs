//! LAN gateway for networked 3D printers.
//!
//! The gateway keeps two always-on connections to one printer — a
//! framed command port and a peer-to-peer session used for camera
//! frames and control — and republishes their traffic to local clients
//! over a Unix domain socket bridge. Long-lived work runs as services
//! under a [`fabgate_service::ServiceManager`]; the printer protocols
//! live in [`fabgate_wire`] and [`fabgate_link`].
//!
//! - [`svc`] — the concrete gateway services: command stream, camera
//!   stream, file transfer.
//! - [`bridge`] — the local client protocol and its listener.
//! - [`config`] — the gateway's configuration file.
//! - [`sim`] — a simulated printer for development and tests.

pub mod bridge;
pub mod config;
pub mod event;
pub mod sim;
pub mod svc;

pub use bridge::{BridgeClient, BridgeError, BridgeListener, Topic};
pub use config::{ConfigError, GatewayConfig, PrinterProfile};
pub use event::GatewayEvent;
