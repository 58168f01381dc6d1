use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::time::Instant;

use fabgate_link::{LinkError, LinkHandle, SessionCommand};
use fabgate_service::{Service, ServiceContext, SharedControl, Tick};

use crate::event::GatewayEvent;

const IDLE_SLICE: Duration = Duration::from_secs(5);
const QUEUE_RETRY: Duration = Duration::from_millis(10);
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// File transfer tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Upload budget in bits per second.
    pub rate_limit_bps: u64,
    /// Bytes per `FileChunk`.
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            rate_limit_bps: 10_000_000,
            chunk_size: 32 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The link went down before or during the transfer.
    #[error("link is not connected")]
    NotConnected,

    /// The session rejected a transfer command.
    #[error("transfer command rejected: {0}")]
    Link(#[from] LinkError),
}

/// Fixed-window byte budget; sleeps into the next window when spent.
struct RateLimiter {
    budget: u64,
    window: Duration,
    window_start: Instant,
    spent: u64,
}

impl RateLimiter {
    fn new(rate_limit_bps: u64, window: Duration) -> Self {
        Self {
            budget: (rate_limit_bps / 8).max(1),
            window,
            window_start: Instant::now(),
            spent: 0,
        }
    }

    async fn reserve(&mut self, bytes: u64) {
        loop {
            let now = Instant::now();
            if now.duration_since(self.window_start) >= self.window {
                self.window_start = now;
                self.spent = 0;
            }
            // A chunk larger than the whole budget still goes out, one
            // per window.
            if self.spent == 0 && bytes >= self.budget {
                self.spent = self.budget;
                return;
            }
            if self.spent + bytes <= self.budget {
                self.spent += bytes;
                return;
            }
            tokio::time::sleep_until(self.window_start + self.window).await;
        }
    }
}

/// Queue a command, waiting out transient queue pressure.
async fn send_paced(link: &LinkHandle, command: SessionCommand) -> Result<(), TransferError> {
    loop {
        match link.send(command.clone()) {
            Ok(()) => return Ok(()),
            Err(LinkError::QueueFull) => tokio::time::sleep(QUEUE_RETRY).await,
            Err(LinkError::NotConnected) => return Err(TransferError::NotConnected),
            Err(other) => return Err(TransferError::Link(other)),
        }
    }
}

/// Exclusive upload surface; reached through the manager's borrow, which
/// is what serializes transfers.
pub struct TransferControl {
    link: LinkHandle,
    config: TransferConfig,
    limiter: tokio::sync::Mutex<RateLimiter>,
    seed: AtomicU64,
}

impl TransferControl {
    fn new(link: LinkHandle, config: TransferConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_bps, RATE_WINDOW);
        let seed = unix_nanos() ^ u64::from(std::process::id());
        Self {
            link,
            config,
            limiter: tokio::sync::Mutex::new(limiter),
            seed: AtomicU64::new(seed),
        }
    }

    /// Upload one file: `FileBegin`, rate-limited `FileChunk`s, `FileEnd`.
    /// Returns the transfer id the printer saw.
    pub async fn send_file(&self, name: &str, bytes: Bytes) -> Result<String, TransferError> {
        if !self.link.connected() {
            return Err(TransferError::NotConnected);
        }

        let id = self.transfer_id();
        tracing::info!(transfer = %id, file = name, size = bytes.len(), "upload starting");
        send_paced(
            &self.link,
            SessionCommand::FileBegin {
                id: id.clone(),
                name: name.to_string(),
                size: bytes.len() as u64,
            },
        )
        .await?;

        let mut limiter = self.limiter.lock().await;
        let mut pos = 0usize;
        while pos < bytes.len() {
            let end = usize::min(pos + self.config.chunk_size, bytes.len());
            let data = bytes.slice(pos..end);
            limiter.reserve(data.len() as u64).await;
            send_paced(
                &self.link,
                SessionCommand::FileChunk {
                    pos: pos as u64,
                    data,
                },
            )
            .await?;
            pos = end;
        }

        send_paced(&self.link, SessionCommand::FileEnd).await?;
        tracing::info!(transfer = %id, "upload finished");
        Ok(id)
    }

    /// 16 hex chars from a mixed time/pid seed.
    fn transfer_id(&self) -> String {
        let raw = self
            .seed
            .fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed)
            ^ unix_nanos();
        format!("{:016x}", mix64(raw))
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// splitmix64 finalizer.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Holds the upload lane open. All the work happens through
/// [`TransferControl`]; the worker itself only idles.
pub struct TransferService {
    control: Arc<TransferControl>,
}

impl TransferService {
    pub fn new(link: LinkHandle, config: TransferConfig) -> Self {
        Self {
            control: Arc::new(TransferControl::new(link, config)),
        }
    }

    pub fn control(&self) -> Arc<TransferControl> {
        Arc::clone(&self.control)
    }
}

impl Service<GatewayEvent> for TransferService {
    fn start<'a>(
        &'a mut self,
        _ctx: &'a ServiceContext<GatewayEvent>,
    ) -> BoxFuture<'a, fabgate_service::Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn run<'a>(
        &'a mut self,
        _ctx: &'a ServiceContext<GatewayEvent>,
    ) -> BoxFuture<'a, fabgate_service::Result<Tick>> {
        Box::pin(async move { Ok(Tick::Idle(IDLE_SLICE)) })
    }

    fn stop<'a>(&'a mut self, _ctx: &'a ServiceContext<GatewayEvent>) -> BoxFuture<'a, ()> {
        Box::pin(async move {})
    }

    fn shared(&self) -> Option<SharedControl> {
        Some(Arc::clone(&self.control) as SharedControl)
    }
}
