//! Async service runtime for the gateway.
//!
//! A [`ServiceManager`] owns a set of named long-lived workers. Each
//! worker implements [`Service`] — a start hook, a sliced run loop, and
//! a stop hook — and is driven by its own task. The manager fans worker
//! events out over per-service broadcast channels ([`Subscription`]),
//! hands out scoped exclusive access to worker control surfaces
//! ([`Borrowed`]), and reports lifecycle state ([`RunState`]).
//!
//! The manager is an explicit value passed to whatever needs it; there
//! is no process-wide instance.

pub mod error;
pub mod manager;
pub mod service;

pub use error::{Result, ServiceError, StreamError};
pub use manager::{
    Borrowed, RestartReport, ServiceManager, ServiceStatus, Subscription,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use service::{RunState, Service, ServiceContext, SharedControl, Tick};
