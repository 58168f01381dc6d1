use std::time::Duration;

use futures_core::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use fabgate_service::{Service, ServiceContext, ServiceError, SharedControl, Tick};
use fabgate_wire::{split_payload, Assembler, Frame, FrameCodec, FrameError, MAX_PAYLOAD};

use crate::event::GatewayEvent;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const RESTART_BACKOFF: Duration = Duration::from_secs(1);
const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// The byte stream the command channel runs on.
pub trait CommandIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> CommandIo for T {}

/// Factory for command channel connections; one call per (re)connect.
pub trait CommandTransport: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, std::io::Result<Box<dyn CommandIo>>>;
}

/// Plain TCP to the printer's command port.
pub struct TcpCommandTransport {
    addr: String,
}

impl TcpCommandTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl CommandTransport for TcpCommandTransport {
    fn connect(&self) -> BoxFuture<'_, std::io::Result<Box<dyn CommandIo>>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr).await?;
            Ok(Box::new(stream) as Box<dyn CommandIo>)
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandSendError {
    /// The command worker is not running.
    #[error("command worker is not running")]
    Closed,

    /// The outbound queue is full.
    #[error("outbound command queue is full")]
    QueueFull,
}

/// Clonable outbound surface for the command channel.
#[derive(Clone)]
pub struct CommandHandle {
    outbound: mpsc::Sender<Frame>,
}

impl CommandHandle {
    /// Queue a frame for the printer. Payloads over the single-frame
    /// limit are split into a fragmented sequence before hitting the
    /// wire.
    pub fn send(&self, frame: Frame) -> Result<(), CommandSendError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => CommandSendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CommandSendError::Closed,
        })
    }
}

/// What one worker slice observed on the command channel.
enum Slice {
    Quiet,
    Frame(Frame),
    Eof,
    Broken(FrameError),
    Outbound(Frame),
}

/// Owns the printer command channel.
///
/// Inbound frames are reassembled per device and published as
/// [`GatewayEvent::Command`]; outbound frames queued through the
/// [`CommandHandle`] are written to the stream. EOF or an I/O error
/// drops the connection and asks the driver for a full reconnect.
pub struct CommandService {
    transport: Box<dyn CommandTransport>,
    handle: CommandHandle,
    outbound: mpsc::Receiver<Frame>,
    conn: Option<Framed<Box<dyn CommandIo>, FrameCodec>>,
    assembler: Assembler,
}

impl CommandService {
    pub fn new<T: CommandTransport>(transport: T) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        Self {
            transport: Box::new(transport),
            handle: CommandHandle { outbound: tx },
            outbound: rx,
            conn: None,
            assembler: Assembler::new(),
        }
    }

    /// Outbound surface. Also exposed via `shared()`.
    pub fn handle(&self) -> CommandHandle {
        self.handle.clone()
    }

    async fn recycle(&mut self) -> Tick {
        self.conn = None;
        tokio::time::sleep(RESTART_BACKOFF).await;
        Tick::Restart
    }
}

/// Write one frame, splitting oversized payloads into fragments.
async fn write_frame(
    conn: &mut Framed<Box<dyn CommandIo>, FrameCodec>,
    frame: Frame,
) -> Result<(), FrameError> {
    if frame.payload.len() > MAX_PAYLOAD {
        for part in split_payload(&frame.device_id, frame.payload.clone(), MAX_PAYLOAD) {
            conn.send(part).await?;
        }
        return Ok(());
    }
    conn.send(frame).await
}

impl Service<GatewayEvent> for CommandService {
    fn start<'a>(
        &'a mut self,
        ctx: &'a ServiceContext<GatewayEvent>,
    ) -> BoxFuture<'a, fabgate_service::Result<()>> {
        Box::pin(async move {
            let stream = timeout(CONNECT_TIMEOUT, self.transport.connect())
                .await
                .map_err(|_| {
                    ServiceError::worker(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "command channel connect timed out",
                    ))
                })?
                .map_err(ServiceError::worker)?;

            self.conn = Some(Framed::new(stream, FrameCodec));
            // Partial reassembly state from a previous connection is stale.
            self.assembler = Assembler::new();
            tracing::info!(service = %ctx.name(), "command channel connected");
            Ok(())
        })
    }

    fn run<'a>(
        &'a mut self,
        ctx: &'a ServiceContext<GatewayEvent>,
    ) -> BoxFuture<'a, fabgate_service::Result<Tick>> {
        Box::pin(async move {
            let slice = {
                let conn = self.conn.as_mut().ok_or_else(|| {
                    ServiceError::worker(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "command channel is not connected",
                    ))
                })?;
                tokio::select! {
                    inbound = timeout(POLL_INTERVAL, conn.next()) => {
                        match inbound {
                            Err(_) => Slice::Quiet,
                            Ok(None) => Slice::Eof,
                            Ok(Some(Ok(frame))) => Slice::Frame(frame),
                            Ok(Some(Err(err))) => Slice::Broken(err),
                        }
                    }
                    frame = self.outbound.recv() => {
                        match frame {
                            Some(frame) => Slice::Outbound(frame),
                            // Unreachable while we hold our own handle.
                            None => Slice::Quiet,
                        }
                    }
                }
            };

            match slice {
                Slice::Quiet => {}
                Slice::Frame(frame) => match self.assembler.accept(frame) {
                    Ok(Some(message)) => {
                        ctx.publish(GatewayEvent::Command(message));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(service = %ctx.name(), error = %err, "fragment dropped");
                    }
                },
                Slice::Outbound(frame) => {
                    let conn = self.conn.as_mut().ok_or_else(|| {
                        ServiceError::worker(std::io::Error::new(
                            std::io::ErrorKind::NotConnected,
                            "command channel is not connected",
                        ))
                    })?;
                    if let Err(err) = write_frame(conn, frame).await {
                        tracing::warn!(service = %ctx.name(), error = %err, "command write failed");
                        return Ok(self.recycle().await);
                    }
                }
                Slice::Eof => {
                    tracing::warn!(service = %ctx.name(), "command channel closed by peer");
                    return Ok(self.recycle().await);
                }
                Slice::Broken(err) => {
                    tracing::warn!(service = %ctx.name(), error = %err, "command channel broke");
                    return Ok(self.recycle().await);
                }
            }

            Ok(Tick::Progress)
        })
    }

    fn stop<'a>(&'a mut self, _ctx: &'a ServiceContext<GatewayEvent>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.conn = None;
        })
    }

    fn shared(&self) -> Option<SharedControl> {
        Some(std::sync::Arc::new(self.handle.clone()))
    }
}
