use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::manager::ServiceManager;

/// Lifecycle state of a registered service.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped` is the
/// normal cycle; `Starting` and `Running` fall into `Error` on a worker
/// fault, and only an explicit `start`/`stop`/`restart_all` leaves
/// `Error` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Error => "error",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a worker wants after one `run` slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// More work immediately.
    Progress,
    /// Nothing to do; sleep this long before the next slice.
    Idle(Duration),
    /// Tear the worker down and start it again, staying `Running`
    /// from the manager's point of view.
    Restart,
}

/// Type-erased control surface reachable through
/// [`ServiceManager::borrow`] and [`ServiceManager::get`].
pub type SharedControl = Arc<dyn Any + Send + Sync>;

/// A long-lived worker driven by the manager.
///
/// The manager guarantees the three hooks never run concurrently for
/// one service: `start`, then `run` in a loop, then `stop` — also after
/// a failed `start`, so `stop` must tolerate partially acquired
/// resources.
pub trait Service<M: Clone + Send + 'static>: Send + 'static {
    /// Acquire the worker's resources. A failure puts the service in
    /// [`RunState::Error`] and surfaces as `ServiceStopped` to whoever
    /// requested the start.
    fn start<'a>(&'a mut self, ctx: &'a ServiceContext<M>) -> BoxFuture<'a, Result<()>>;

    /// One slice of the worker loop.
    fn run<'a>(&'a mut self, ctx: &'a ServiceContext<M>) -> BoxFuture<'a, Result<Tick>>;

    /// Release the worker's resources. Must be idempotent.
    fn stop<'a>(&'a mut self, ctx: &'a ServiceContext<M>) -> BoxFuture<'a, ()>;

    /// Control surface captured at registration time.
    fn shared(&self) -> Option<SharedControl> {
        None
    }
}

/// Hook argument: where a worker publishes and how it reaches its
/// manager (explicitly injected; there is no global instance).
pub struct ServiceContext<M> {
    service: String,
    events: broadcast::Sender<M>,
    manager: ServiceManager<M>,
}

impl<M: Clone + Send + 'static> ServiceContext<M> {
    pub(crate) fn new(
        service: String,
        events: broadcast::Sender<M>,
        manager: ServiceManager<M>,
    ) -> Self {
        Self {
            service,
            events,
            manager,
        }
    }

    /// The service's registered name.
    pub fn name(&self) -> &str {
        &self.service
    }

    /// Fan a message out to all current subscribers; returns how many
    /// received it. No subscribers is not an error.
    pub fn publish(&self, message: M) -> usize {
        self.events.send(message).unwrap_or(0)
    }

    /// The owning manager, for cross-service lookups.
    pub fn manager(&self) -> &ServiceManager<M> {
        &self.manager
    }
}
