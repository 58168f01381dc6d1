//! Simulated printer endpoints.
//!
//! `fabgate serve --simulate` and the test suites run against these
//! instead of real hardware: [`SimLinkTransport`] stands in for the
//! printer's session port and [`SimCommandTransport`] for its command
//! port. The simulated printer pushes keepalive reports on its own,
//! honours `StartLive`/`CloseLive`, and records every command it is
//! sent so callers can inspect what reached the device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::Instant;

use fabgate_link::{LinkSession, LinkTransport, SessionCommand, SessionFrame, VIDEO_CHANNEL};
use fabgate_wire::{pack, Frame};

use crate::svc::command::{CommandIo, CommandTransport};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const VIDEO_INTERVAL: Duration = Duration::from_millis(200);
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SimShared {
    commands: Mutex<Vec<SessionCommand>>,
    video_live: AtomicBool,
    connects: AtomicUsize,
}

/// Inspection handle onto the simulated printer's state. Clones share
/// the same printer.
#[derive(Clone)]
pub struct SimPrinter {
    shared: Arc<SimShared>,
}

impl SimPrinter {
    /// Every command the printer has accepted, in arrival order.
    pub fn commands(&self) -> Vec<SessionCommand> {
        lock(&self.shared.commands).clone()
    }

    /// How many sessions have been opened against the printer.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn video_live(&self) -> bool {
        self.shared.video_live.load(Ordering::SeqCst)
    }

    /// Force the camera state, e.g. to make an established stream go
    /// quiet without dropping the session.
    pub fn set_video_live(&self, live: bool) {
        self.shared.video_live.store(live, Ordering::SeqCst);
    }
}

/// Session transport backed by the simulated printer. Connecting always
/// succeeds and yields a session that keeps itself warm with periodic
/// keepalive frames.
pub struct SimLinkTransport {
    shared: Arc<SimShared>,
    camera: bool,
}

impl SimLinkTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SimShared {
                commands: Mutex::new(Vec::new()),
                video_live: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
            }),
            camera: true,
        }
    }

    /// A printer model without a camera: `StartLive` is recorded but
    /// never produces frames.
    pub fn without_camera(mut self) -> Self {
        self.camera = false;
        self
    }

    pub fn printer(&self) -> SimPrinter {
        SimPrinter {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for SimLinkTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTransport for SimLinkTransport {
    fn connect(&self) -> BoxFuture<'_, fabgate_link::Result<Box<dyn LinkSession>>> {
        Box::pin(async move {
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SimSession {
                shared: Arc::clone(&self.shared),
                camera: self.camera,
                next_keepalive: Instant::now() + KEEPALIVE_INTERVAL,
                next_video: Instant::now() + VIDEO_INTERVAL,
                video_seq: 0,
            }) as Box<dyn LinkSession>)
        })
    }
}

struct SimSession {
    shared: Arc<SimShared>,
    camera: bool,
    next_keepalive: Instant,
    next_video: Instant,
    video_seq: u32,
}

impl LinkSession for SimSession {
    fn recv(&mut self) -> BoxFuture<'_, fabgate_link::Result<Option<SessionFrame>>> {
        Box::pin(async move {
            let live = self.camera && self.shared.video_live.load(Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep_until(self.next_keepalive) => {
                    self.next_keepalive = Instant::now() + KEEPALIVE_INTERVAL;
                    Ok(Some(SessionFrame::new(0, Bytes::from_static(b"{\"ok\": 1}"))))
                }
                _ = tokio::time::sleep_until(self.next_video), if live => {
                    self.next_video = Instant::now() + VIDEO_INTERVAL;
                    self.video_seq = self.video_seq.wrapping_add(1);
                    let mut payload = Vec::with_capacity(6);
                    payload.extend_from_slice(&[0xFF, 0xD8]);
                    payload.extend_from_slice(&self.video_seq.to_le_bytes());
                    Ok(Some(SessionFrame::new(VIDEO_CHANNEL, payload)))
                }
            }
        })
    }

    fn send(&mut self, command: SessionCommand) -> BoxFuture<'_, fabgate_link::Result<()>> {
        Box::pin(async move {
            match &command {
                SessionCommand::StartLive { .. } if self.camera => {
                    self.shared.video_live.store(true, Ordering::SeqCst);
                    self.next_video = Instant::now() + VIDEO_INTERVAL;
                }
                SessionCommand::CloseLive => {
                    self.shared.video_live.store(false, Ordering::SeqCst);
                }
                _ => {}
            }
            lock(&self.shared.commands).push(command);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.shared.video_live.store(false, Ordering::SeqCst);
        })
    }

    fn endpoint(&self) -> String {
        "sim://printer".to_string()
    }
}

/// Command-port transport backed by an in-memory stream. The far end
/// pushes a framed status report every couple of seconds and swallows
/// whatever the gateway writes.
pub struct SimCommandTransport {
    device_id: String,
    interval: Duration,
}

impl SimCommandTransport {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            interval: REPORT_INTERVAL,
        }
    }
}

impl CommandTransport for SimCommandTransport {
    fn connect(&self) -> BoxFuture<'_, std::io::Result<Box<dyn CommandIo>>> {
        Box::pin(async move {
            let (local, remote) = tokio::io::duplex(64 * 1024);
            tokio::spawn(report_pump(remote, self.device_id.clone(), self.interval));
            Ok(Box::new(local) as Box<dyn CommandIo>)
        })
    }
}

async fn report_pump(remote: DuplexStream, device_id: String, interval: Duration) {
    let (mut rd, mut wr) = tokio::io::split(remote);
    let mut scratch = [0u8; 1024];
    let mut seq = 0u32;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                seq = seq.wrapping_add(1);
                let report = format!(
                    "CMD M105 Received.\r\nT0:{}/210 B:{}/60\r\nok\r\n",
                    200 + (seq % 10),
                    55 + (seq % 5),
                );
                let frame = Frame::single(device_id.clone(), report);
                let wire = match pack(&frame) {
                    Ok(wire) => wire,
                    Err(_) => break,
                };
                if wr.write_all(&wire).await.is_err() {
                    break;
                }
            }
            read = rd.read(&mut scratch) => {
                match read {
                    // Commands from the gateway are accepted and dropped.
                    Ok(n) if n > 0 => {}
                    _ => break,
                }
            }
        }
    }
}
