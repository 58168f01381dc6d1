//! The gateway's services, keyed by these registration names.

pub mod command;
pub mod transfer;
pub mod video;

/// Printer link supervisor.
pub const LINK: &str = "link";
/// Command channel worker.
pub const COMMANDS: &str = "commands";
/// Camera stream worker.
pub const VIDEO: &str = "video";
/// File upload lane.
pub const TRANSFER: &str = "transfer";
