use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_core::future::BoxFuture;
use tokio::time::Instant;

use fabgate_link::{LinkError, LinkEvent, LinkHandle, SessionCommand};
use fabgate_service::{
    Service, ServiceContext, ServiceError, SharedControl, StreamError, Subscription, Tick,
};

use crate::event::GatewayEvent;
use crate::svc;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);
const STALL_WINDOW: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared control surface of the camera stream.
///
/// Light and quality settings persist here across worker restarts; the
/// worker re-applies them after every `StartLive`.
pub struct VideoControl {
    enabled: AtomicBool,
    light: Mutex<Option<bool>>,
    quality: Mutex<Option<u8>>,
    link: LinkHandle,
}

impl VideoControl {
    fn new(link: LinkHandle) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            light: Mutex::new(None),
            quality: Mutex::new(None),
            link,
        }
    }

    /// Flip the enabled flag; returns whether it changed.
    pub fn set_enabled(&self, on: bool) -> bool {
        self.enabled.swap(on, Ordering::SeqCst) != on
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Toggle the chamber light. The setting is remembered and re-applied
    /// after stream restarts; a down link is a warning, not a fault.
    pub fn set_light(&self, on: bool) {
        *lock(&self.light) = Some(on);
        if let Err(err) = self.link.send(SessionCommand::LightState(on)) {
            tracing::warn!(error = %err, "light toggle not delivered");
        }
    }

    /// Select the live stream quality mode. Remembered like the light.
    pub fn set_quality(&self, mode: u8) {
        *lock(&self.quality) = Some(mode);
        if let Err(err) = self.link.send(SessionCommand::LiveMode(mode)) {
            tracing::warn!(error = %err, "quality change not delivered");
        }
    }

    fn start_live(&self) -> Result<(), LinkError> {
        self.link.send(SessionCommand::StartLive {
            settings: serde_json::json!({}),
        })
    }

    fn close_live(&self) {
        if let Err(err) = self.link.send(SessionCommand::CloseLive) {
            tracing::debug!(error = %err, "close live not delivered");
        }
    }

    /// Re-send remembered light/quality after a stream (re)start.
    fn apply_saved(&self) {
        let light = *lock(&self.light);
        if let Some(on) = light {
            if let Err(err) = self.link.send(SessionCommand::LightState(on)) {
                tracing::warn!(error = %err, "saved light state not re-applied");
            }
        }
        let quality = *lock(&self.quality);
        if let Some(mode) = quality {
            if let Err(err) = self.link.send(SessionCommand::LiveMode(mode)) {
                tracing::warn!(error = %err, "saved quality not re-applied");
            }
        }
    }
}

/// Forwards camera frames from the link session to the gateway stream.
///
/// Liveness: no first frame within [`FIRST_FRAME_TIMEOUT`] asks the
/// driver for a restart; an established stream that goes quiet for
/// [`STALL_WINDOW`] is nudged once with `CloseLive` + `StartLive`, and
/// restarted if the nudge brings nothing back.
pub struct VideoService {
    control: Arc<VideoControl>,
    sub: Option<Subscription<GatewayEvent>>,
    last_activity: Option<Instant>,
    got_first: bool,
    nudged: bool,
}

impl VideoService {
    pub fn new(link: LinkHandle) -> Self {
        Self {
            control: Arc::new(VideoControl::new(link)),
            sub: None,
            last_activity: None,
            got_first: false,
            nudged: false,
        }
    }

    pub fn control(&self) -> Arc<VideoControl> {
        Arc::clone(&self.control)
    }

    async fn recycle(&mut self) -> Tick {
        tokio::time::sleep(RESTART_BACKOFF).await;
        Tick::Restart
    }
}

impl Service<GatewayEvent> for VideoService {
    fn start<'a>(
        &'a mut self,
        ctx: &'a ServiceContext<GatewayEvent>,
    ) -> BoxFuture<'a, fabgate_service::Result<()>> {
        Box::pin(async move {
            // Subscribing brings the link up and opens the broadcast
            // before it, so no early frame is missed.
            self.sub = Some(ctx.manager().stream(svc::LINK).await?);
            self.control.start_live().map_err(ServiceError::worker)?;
            self.control.apply_saved();
            self.last_activity = Some(Instant::now());
            self.got_first = false;
            self.nudged = false;
            tracing::info!(service = %ctx.name(), "live stream requested");
            Ok(())
        })
    }

    fn run<'a>(
        &'a mut self,
        ctx: &'a ServiceContext<GatewayEvent>,
    ) -> BoxFuture<'a, fabgate_service::Result<Tick>> {
        Box::pin(async move {
            let sub = self.sub.as_mut().ok_or_else(|| {
                ServiceError::worker(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "link subscription not established",
                ))
            })?;

            match sub.recv_timeout(POLL_INTERVAL).await {
                Ok(Some(GatewayEvent::Link(LinkEvent::Frame(frame)))) if frame.is_video() => {
                    self.last_activity = Some(Instant::now());
                    self.got_first = true;
                    self.nudged = false;
                    ctx.publish(GatewayEvent::Video(frame.payload));
                }
                Ok(Some(_)) | Ok(None) => {}
                Err(StreamError::Lagged(skipped)) => {
                    tracing::warn!(service = %ctx.name(), skipped, "video worker lagging behind the link");
                }
                Err(err @ StreamError::Closed) => return Err(ServiceError::worker(err)),
            }

            let window = if self.got_first {
                STALL_WINDOW
            } else {
                FIRST_FRAME_TIMEOUT
            };
            let quiet_too_long = self
                .last_activity
                .map(|seen| seen.elapsed() > window)
                .unwrap_or(false);
            if quiet_too_long {
                if self.got_first && !self.nudged {
                    tracing::warn!(service = %ctx.name(), "stream stalled, nudging the camera");
                    self.nudged = true;
                    self.last_activity = Some(Instant::now());
                    self.control.close_live();
                    if let Err(err) = self.control.start_live() {
                        tracing::warn!(service = %ctx.name(), error = %err, "nudge not delivered");
                    }
                    self.control.apply_saved();
                } else {
                    tracing::warn!(service = %ctx.name(), "no video frames, restarting the stream");
                    return Ok(self.recycle().await);
                }
            }

            Ok(Tick::Progress)
        })
    }

    fn stop<'a>(&'a mut self, _ctx: &'a ServiceContext<GatewayEvent>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.control.close_live();
            self.sub = None;
            self.last_activity = None;
            self.got_first = false;
            self.nudged = false;
        })
    }

    fn shared(&self) -> Option<SharedControl> {
        Some(Arc::clone(&self.control) as SharedControl)
    }
}
