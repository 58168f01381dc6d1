use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{LinkError, Result};
use crate::session::SessionCommand;

/// Lock a mutex, recovering the guard if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connection state of the printer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No session, and no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A session is established.
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the link.
///
/// `last_heartbeat` is stamped on connect and on every inbound frame, so
/// it is monotone non-decreasing while a session lives.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub state: LinkState,
    pub endpoint: Option<String>,
    pub last_heartbeat: Option<Instant>,
}

impl ConnectionInfo {
    fn idle() -> Self {
        Self {
            state: LinkState::Disconnected,
            endpoint: None,
            last_heartbeat: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

/// Clonable control surface for the link supervisor.
///
/// Other services hold a `LinkHandle` to read connection status and queue
/// outbound commands. Only the supervisor worker mutates the underlying
/// info; everyone else gets snapshots.
#[derive(Clone)]
pub struct LinkHandle {
    info: Arc<Mutex<ConnectionInfo>>,
    commands: mpsc::Sender<SessionCommand>,
}

impl LinkHandle {
    pub(crate) fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            info: Arc::new(Mutex::new(ConnectionInfo::idle())),
            commands,
        }
    }

    /// Current view of the connection.
    pub fn snapshot(&self) -> ConnectionInfo {
        lock(&self.info).clone()
    }

    /// Whether a session is currently established.
    pub fn connected(&self) -> bool {
        lock(&self.info).connected()
    }

    /// Queue a command for the session.
    ///
    /// Fails with [`LinkError::NotConnected`] when the link is down and
    /// [`LinkError::QueueFull`] when the worker is not keeping up.
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        if !self.connected() {
            return Err(LinkError::NotConnected);
        }
        self.commands.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => LinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => LinkError::NotConnected,
        })
    }

    pub(crate) fn set_connecting(&self) {
        let mut info = lock(&self.info);
        info.state = LinkState::Connecting;
        info.endpoint = None;
        info.last_heartbeat = None;
    }

    pub(crate) fn set_connected(&self, endpoint: String) {
        let mut info = lock(&self.info);
        info.state = LinkState::Connected;
        info.endpoint = Some(endpoint);
        info.last_heartbeat = Some(Instant::now());
    }

    pub(crate) fn stamp_heartbeat(&self) {
        lock(&self.info).last_heartbeat = Some(Instant::now());
    }

    pub(crate) fn clear_connection(&self) {
        *lock(&self.info) = ConnectionInfo::idle();
    }
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.snapshot();
        f.debug_struct("LinkHandle")
            .field("state", &info.state)
            .field("endpoint", &info.endpoint)
            .finish()
    }
}

/// A single observed connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Up,
    Down,
}

/// Turns a polled boolean level into at most one edge per transition.
///
/// Pollers that sample connection state on a timer use this to report
/// `Up`/`Down` exactly once no matter how often they sample.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    prev: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current level; returns the edge if the level changed.
    pub fn observe(&mut self, level: bool) -> Option<Edge> {
        let edge = match (self.prev, level) {
            (false, true) => Some(Edge::Up),
            (true, false) => Some(Edge::Down),
            _ => None,
        };
        self.prev = level;
        edge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_detector_reports_each_transition_once() {
        let mut edges = EdgeDetector::new();
        assert_eq!(edges.observe(false), None);
        assert_eq!(edges.observe(true), Some(Edge::Up));
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(false), Some(Edge::Down));
        assert_eq!(edges.observe(false), None);
        assert_eq!(edges.observe(true), Some(Edge::Up));
    }

    #[test]
    fn handle_rejects_sends_while_disconnected() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = LinkHandle::new(tx);

        assert!(matches!(
            handle.send(SessionCommand::Heartbeat),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn handle_maps_full_queue_to_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = LinkHandle::new(tx);
        handle.set_connected("sim".to_string());

        handle
            .send(SessionCommand::Heartbeat)
            .expect("first send should fit the queue");
        assert!(matches!(
            handle.send(SessionCommand::Heartbeat),
            Err(LinkError::QueueFull)
        ));
    }

    #[test]
    fn snapshot_tracks_connection_lifecycle() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = LinkHandle::new(tx);

        assert_eq!(handle.snapshot().state, LinkState::Disconnected);

        handle.set_connecting();
        assert_eq!(handle.snapshot().state, LinkState::Connecting);
        assert!(!handle.connected());

        handle.set_connected("192.168.1.40:32100".to_string());
        let info = handle.snapshot();
        assert_eq!(info.state, LinkState::Connected);
        assert_eq!(info.endpoint.as_deref(), Some("192.168.1.40:32100"));
        assert!(info.last_heartbeat.is_some());

        handle.clear_connection();
        let info = handle.snapshot();
        assert_eq!(info.state, LinkState::Disconnected);
        assert!(info.endpoint.is_none());
        assert!(info.last_heartbeat.is_none());
    }
}
