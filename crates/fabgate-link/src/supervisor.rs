use std::time::Duration;

use futures_core::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use fabgate_service::{Service, ServiceContext, ServiceError, SharedControl, Tick};

use crate::error::LinkError;
use crate::session::{LinkEvent, LinkSession, LinkTransport, SessionCommand, SessionFrame};
use crate::status::LinkHandle;

/// Outbound commands queued between [`LinkHandle::send`] and the worker.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Timing knobs for the link supervisor.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Upper bound on one worker slice waiting for inbound traffic.
    pub poll_interval: Duration,
    /// How often status consumers are expected to sample the link.
    pub status_interval: Duration,
    /// No inbound traffic for this long means the session is dead.
    pub stall_window: Duration,
    /// Pause between tearing a session down and reconnecting.
    pub restart_backoff: Duration,
    /// Upper bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Cadence of outbound keepalives.
    pub heartbeat_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(3),
            stall_window: Duration::from_secs(10),
            restart_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// What one worker slice observed.
enum Slice {
    /// Nothing within the poll window.
    Quiet,
    /// Inbound traffic.
    Frame(SessionFrame),
    /// Peer closed the session cleanly.
    Closed,
    /// The session broke.
    RecvFailed(LinkError),
    /// A queued command is ready to go out.
    Outbound(SessionCommand),
}

/// Keeps one session to the printer alive.
///
/// Runs under a [`fabgate_service::ServiceManager`]: `start` establishes a
/// session, `run` slices pump traffic and watch for stalls, and any dead
/// session is fully torn down (sockets released) before the worker asks
/// for a restart. `Up`/`Down` are published exactly once per transition.
pub struct LinkSupervisor {
    transport: Box<dyn LinkTransport>,
    config: LinkConfig,
    handle: LinkHandle,
    commands: mpsc::Receiver<SessionCommand>,
    session: Option<Box<dyn LinkSession>>,
    last_heartbeat_sent: Option<Instant>,
    up_announced: bool,
}

impl LinkSupervisor {
    pub fn new<T: LinkTransport>(transport: T, config: LinkConfig) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Self {
            transport: Box::new(transport),
            config,
            handle: LinkHandle::new(tx),
            commands: rx,
            session: None,
            last_heartbeat_sent: None,
            up_announced: false,
        }
    }

    /// Control surface for other services. Also exposed via `shared()`.
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Close and drop the session, reset status, publish `Down` once.
    async fn teardown<M>(&mut self, ctx: &ServiceContext<M>)
    where
        M: From<LinkEvent> + Clone + Send + 'static,
    {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.handle.clear_connection();
        self.last_heartbeat_sent = None;
        if std::mem::take(&mut self.up_announced) {
            ctx.publish(M::from(LinkEvent::Down));
        }
    }

    /// Teardown, back off, and hand control back to the driver.
    async fn recycle<M>(&mut self, ctx: &ServiceContext<M>) -> Tick
    where
        M: From<LinkEvent> + Clone + Send + 'static,
    {
        self.teardown(ctx).await;
        tokio::time::sleep(self.config.restart_backoff).await;
        Tick::Restart
    }
}

impl<M> Service<M> for LinkSupervisor
where
    M: From<LinkEvent> + Clone + Send + 'static,
{
    fn start<'a>(
        &'a mut self,
        ctx: &'a ServiceContext<M>,
    ) -> BoxFuture<'a, fabgate_service::Result<()>> {
        Box::pin(async move {
            self.handle.set_connecting();
            // Drop anything queued against a previous session.
            while self.commands.try_recv().is_ok() {}

            let session = timeout(self.config.connect_timeout, self.transport.connect())
                .await
                .map_err(|_| {
                    ServiceError::worker(LinkError::ConnectTimeout {
                        after: self.config.connect_timeout,
                    })
                })?
                .map_err(ServiceError::worker)?;

            let endpoint = session.endpoint();
            self.session = Some(session);
            self.handle.set_connected(endpoint.clone());
            self.last_heartbeat_sent = Some(Instant::now());
            self.up_announced = true;
            ctx.publish(M::from(LinkEvent::Up));
            tracing::info!(service = %ctx.name(), endpoint = %endpoint, "link established");
            Ok(())
        })
    }

    fn run<'a>(
        &'a mut self,
        ctx: &'a ServiceContext<M>,
    ) -> BoxFuture<'a, fabgate_service::Result<Tick>> {
        Box::pin(async move {
            let slice = {
                let session = self
                    .session
                    .as_mut()
                    .ok_or_else(|| ServiceError::worker(LinkError::NotConnected))?;
                tokio::select! {
                    inbound = timeout(self.config.poll_interval, session.recv()) => {
                        match inbound {
                            Err(_) => Slice::Quiet,
                            Ok(Ok(Some(frame))) => Slice::Frame(frame),
                            Ok(Ok(None)) => Slice::Closed,
                            Ok(Err(err)) => Slice::RecvFailed(err),
                        }
                    }
                    command = self.commands.recv() => {
                        match command {
                            Some(command) => Slice::Outbound(command),
                            // Unreachable while we hold our own handle.
                            None => Slice::Quiet,
                        }
                    }
                }
            };

            match slice {
                Slice::Quiet => {}
                Slice::Frame(frame) => {
                    self.handle.stamp_heartbeat();
                    ctx.publish(M::from(LinkEvent::Frame(frame)));
                }
                Slice::Outbound(command) => {
                    let session = self
                        .session
                        .as_mut()
                        .ok_or_else(|| ServiceError::worker(LinkError::NotConnected))?;
                    if let Err(err) = session.send(command).await {
                        tracing::warn!(service = %ctx.name(), error = %err, "command send failed");
                        return Ok(self.recycle(ctx).await);
                    }
                }
                Slice::Closed => {
                    tracing::warn!(service = %ctx.name(), "session closed by peer");
                    return Ok(self.recycle(ctx).await);
                }
                Slice::RecvFailed(err) => {
                    tracing::warn!(service = %ctx.name(), error = %err, "session receive failed");
                    return Ok(self.recycle(ctx).await);
                }
            }

            let keepalive_due = self
                .last_heartbeat_sent
                .map(|sent| sent.elapsed() >= self.config.heartbeat_interval)
                .unwrap_or(true);
            if keepalive_due {
                if let Some(session) = self.session.as_mut() {
                    if let Err(err) = session.send(SessionCommand::Heartbeat).await {
                        tracing::warn!(service = %ctx.name(), error = %err, "heartbeat send failed");
                        return Ok(self.recycle(ctx).await);
                    }
                    self.last_heartbeat_sent = Some(Instant::now());
                }
            }

            let stalled = self
                .handle
                .snapshot()
                .last_heartbeat
                .map(|seen| seen.elapsed() > self.config.stall_window)
                .unwrap_or(false);
            if stalled {
                tracing::warn!(
                    service = %ctx.name(),
                    window = ?self.config.stall_window,
                    "no traffic within the stall window, recycling session"
                );
                return Ok(self.recycle(ctx).await);
            }

            Ok(Tick::Progress)
        })
    }

    fn stop<'a>(&'a mut self, ctx: &'a ServiceContext<M>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.teardown(ctx).await;
        })
    }

    fn shared(&self) -> Option<SharedControl> {
        Some(std::sync::Arc::new(self.handle.clone()))
    }
}
