use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use fabgate_link::{Edge, EdgeDetector, LinkHandle};
use fabgate_service::{ServiceManager, StreamError};

use super::codec::{BridgeCodec, BridgeFrame, CHANNEL_CONTROL};
use super::{BridgeError, Topic};
use crate::config::GatewayConfig;
use crate::event::GatewayEvent;
use crate::svc::{self, video::VideoControl};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

/// Everything a client pump needs, shared across connections.
pub struct BridgeShared {
    manager: ServiceManager<GatewayEvent>,
    config: GatewayConfig,
    link: LinkHandle,
    status_interval: Duration,
}

/// Accepts local clients on a Unix domain socket and serves one topic
/// per connection.
pub struct BridgeListener {
    listener: UnixListener,
    path: PathBuf,
    shared: Arc<BridgeShared>,
}

impl BridgeListener {
    /// Bind the bridge socket, reclaiming a stale file left by a dead
    /// gateway. A path another process still answers on is an error.
    pub fn bind(
        path: impl AsRef<Path>,
        manager: ServiceManager<GatewayEvent>,
        config: GatewayConfig,
        link: LinkHandle,
    ) -> Result<Self, BridgeError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(_) => {
                    return Err(BridgeError::Io(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{} is already served", path.display()),
                    )));
                }
                Err(err)
                    if err.kind() == io::ErrorKind::ConnectionRefused
                        || err.kind() == io::ErrorKind::NotFound =>
                {
                    std::fs::remove_file(&path)?;
                    tracing::debug!(path = %path.display(), "stale bridge socket reclaimed");
                }
                Err(err) => return Err(BridgeError::Io(err)),
            }
        }

        let listener = UnixListener::bind(&path)?;
        let status_interval = config.link_config().status_interval;
        tracing::info!(path = %path.display(), "bridge listening");
        Ok(Self {
            listener,
            path,
            shared: Arc::new(BridgeShared {
                manager,
                config,
                link,
                status_interval,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients until `cancel` fires, then remove the socket file.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(serve_client(shared, stream));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "bridge accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "bridge socket not removed");
            }
        }
    }
}

async fn serve_client(shared: Arc<BridgeShared>, stream: UnixStream) {
    let mut framed = Framed::new(stream, BridgeCodec);

    let hello = match tokio::time::timeout(HELLO_TIMEOUT, framed.next()).await {
        Err(_) => {
            tracing::debug!("client sent no hello in time");
            return;
        }
        Ok(None) => return,
        Ok(Some(Err(err))) => {
            tracing::debug!(error = %err, "client hello unreadable");
            return;
        }
        Ok(Some(Ok(frame))) => frame,
    };

    let topic = match parse_hello(&hello) {
        Ok(topic) => topic,
        Err(err) => {
            tracing::debug!(error = %err, "client rejected");
            return;
        }
    };
    // An unmet gate closes the connection before any data; the reason
    // stays on our side of the socket.
    if let Err(err) = check_gate(&shared, topic) {
        tracing::debug!(topic = %topic, error = %err, "connection refused");
        return;
    }

    tracing::debug!(topic = %topic, "bridge client attached");
    let served = match topic {
        Topic::Commands => pump_commands(&shared, &mut framed).await,
        Topic::Video => pump_video(&shared, &mut framed).await,
        Topic::Status => pump_status(&shared, &mut framed).await,
        Topic::Ctrl => pump_ctrl(&shared, &mut framed).await,
    };
    match served {
        Ok(()) => tracing::debug!(topic = %topic, "bridge client detached"),
        Err(err) => tracing::debug!(topic = %topic, error = %err, "bridge client dropped"),
    }
}

/// The first frame must be `{"topic": <name>}` on the control channel.
fn parse_hello(frame: &BridgeFrame) -> Result<Topic, BridgeError> {
    if frame.channel != CHANNEL_CONTROL {
        return Err(BridgeError::BadHello);
    }
    let doc: Value = serde_json::from_slice(&frame.payload).map_err(|_| BridgeError::BadHello)?;
    let name = doc
        .get("topic")
        .and_then(Value::as_str)
        .ok_or(BridgeError::BadHello)?;
    Topic::from_name(name).ok_or_else(|| BridgeError::UnknownTopic(name.to_string()))
}

fn check_gate(shared: &BridgeShared, topic: Topic) -> Result<(), BridgeError> {
    if !shared.config.configured() {
        return Err(BridgeError::AuthorizationDenied {
            topic: topic.name(),
            reason: "no printer configured",
        });
    }
    if topic == Topic::Video {
        if !shared.config.camera_available() {
            return Err(BridgeError::AuthorizationDenied {
                topic: topic.name(),
                reason: "model has no camera",
            });
        }
        let enabled = shared
            .manager
            .get::<VideoControl>(svc::VIDEO)
            .map(|control| control.enabled())
            .unwrap_or(false);
        if !enabled {
            return Err(BridgeError::AuthorizationDenied {
                topic: topic.name(),
                reason: "video is not enabled",
            });
        }
    }
    Ok(())
}

/// Decoded printer traffic as JSON envelopes, one per logical message.
async fn pump_commands(
    shared: &BridgeShared,
    framed: &mut Framed<UnixStream, BridgeCodec>,
) -> Result<(), BridgeError> {
    let mut sub = shared.manager.stream(svc::COMMANDS).await?;
    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                None => return Ok(()),
                Some(Err(err)) => return Err(err),
                Some(Ok(_)) => {} // outbound-only topic
            },
            event = sub.recv() => match event {
                Ok(GatewayEvent::Command(message)) => {
                    let envelope = json!({
                        "device": message.device_id,
                        "len": message.payload.len(),
                        "payload": BASE64.encode(&message.payload),
                    });
                    framed
                        .send(BridgeFrame::json(Topic::Commands.channel(), &envelope)?)
                        .await?;
                }
                Ok(_) => {}
                Err(StreamError::Lagged(missed)) => {
                    tracing::warn!(missed, "commands client lagging");
                }
                Err(StreamError::Closed) => return Ok(()),
            },
        }
    }
}

/// Raw camera frames, one bridge frame each.
async fn pump_video(
    shared: &BridgeShared,
    framed: &mut Framed<UnixStream, BridgeCodec>,
) -> Result<(), BridgeError> {
    let mut sub = shared.manager.stream(svc::VIDEO).await?;
    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                None => return Ok(()),
                Some(Err(err)) => return Err(err),
                Some(Ok(_)) => {}
            },
            event = sub.recv() => match event {
                Ok(GatewayEvent::Video(payload)) => {
                    framed
                        .send(BridgeFrame::new(Topic::Video.channel(), payload))
                        .await?;
                }
                Ok(_) => {}
                Err(StreamError::Lagged(missed)) => {
                    tracing::warn!(missed, "video client lagging");
                }
                Err(StreamError::Closed) => return Ok(()),
            },
        }
    }
}

/// Connectivity edges, one frame per transition. Link events wake the
/// poll early so an edge is never delayed by a full interval.
async fn pump_status(
    shared: &BridgeShared,
    framed: &mut Framed<UnixStream, BridgeCodec>,
) -> Result<(), BridgeError> {
    let mut sub = shared.manager.stream(svc::LINK).await?;
    let mut edges = EdgeDetector::new();

    loop {
        if let Some(edge) = edges.observe(shared.link.connected()) {
            let status = match edge {
                Edge::Up => "connected",
                Edge::Down => "disconnected",
            };
            framed
                .send(BridgeFrame::json(
                    Topic::Status.channel(),
                    &json!({ "status": status }),
                )?)
                .await?;
        }
        tokio::select! {
            inbound = framed.next() => match inbound {
                None => return Ok(()),
                Some(Err(err)) => return Err(err),
                Some(Ok(_)) => {}
            },
            event = sub.recv() => match event {
                Ok(_) => {}
                Err(StreamError::Lagged(_)) => {}
                Err(StreamError::Closed) => return Ok(()),
            },
            _ = tokio::time::sleep(shared.status_interval) => {}
        }
    }
}

/// Bidirectional control lane: ready marker first, then one JSON
/// document per inbound frame.
async fn pump_ctrl(
    shared: &BridgeShared,
    framed: &mut Framed<UnixStream, BridgeCodec>,
) -> Result<(), BridgeError> {
    framed
        .send(BridgeFrame::json(CHANNEL_CONTROL, &json!({ "fabgate": 1 }))?)
        .await?;

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let doc: Value = match serde_json::from_slice(&frame.payload) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::debug!(error = %err, "control document skipped");
                continue;
            }
        };
        handle_ctrl(shared, framed, &doc).await?;
    }
    Ok(())
}

/// Apply one control document. Recognized keys are handled
/// independently; anything else is ignored and the connection stays
/// open.
async fn handle_ctrl(
    shared: &BridgeShared,
    framed: &mut Framed<UnixStream, BridgeCodec>,
    doc: &Value,
) -> Result<(), BridgeError> {
    if let Some(on) = doc.get("light").and_then(Value::as_bool) {
        let video = shared.manager.borrow::<VideoControl>(svc::VIDEO).await?;
        video.set_light(on);
    }

    if let Some(quality) = doc.get("quality").and_then(Value::as_u64) {
        let video = shared.manager.borrow::<VideoControl>(svc::VIDEO).await?;
        video.set_quality(quality.min(u64::from(u8::MAX)) as u8);
    }

    if let Some(on) = doc.get("video_enabled").and_then(Value::as_bool) {
        let changed = {
            let video = shared.manager.borrow::<VideoControl>(svc::VIDEO).await?;
            video.set_enabled(on)
        };
        if changed {
            let outcome = if on {
                shared.manager.start(svc::VIDEO).await
            } else {
                shared.manager.stop(svc::VIDEO).await
            };
            if let Err(err) = outcome {
                tracing::warn!(enabled = on, error = %err, "video service did not follow");
            }
        }
    }

    if doc.get("status").is_some() {
        let services: Vec<Value> = shared
            .manager
            .status()
            .iter()
            .map(|status| {
                json!({
                    "name": status.name,
                    "state": status.state.as_str(),
                    "online": status.online,
                })
            })
            .collect();
        let reply = json!({
            "services": services,
            "link": shared.link.connected(),
        });
        framed
            .send(BridgeFrame::json(CHANNEL_CONTROL, &reply)?)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use fabgate_link::{LinkConfig, LinkSupervisor};

    use super::*;
    use crate::config::PrinterProfile;
    use crate::sim::SimLinkTransport;
    use crate::svc::video::VideoService;

    fn configured(model: &str) -> GatewayConfig {
        GatewayConfig {
            printers: vec![PrinterProfile {
                name: "bench".to_string(),
                model: model.to_string(),
                device_id: "DEV0001".to_string(),
                command_addr: "192.168.1.50:8899".to_string(),
                p2p_addr: "192.168.1.50:8898".to_string(),
            }],
            ..GatewayConfig::default()
        }
    }

    fn shared_with(config: GatewayConfig) -> (BridgeShared, Arc<VideoControl>) {
        let link = LinkSupervisor::new(SimLinkTransport::new(), LinkConfig::default());
        let handle = link.handle();
        let video = VideoService::new(handle.clone());
        let control = video.control();

        let manager: ServiceManager<GatewayEvent> = ServiceManager::new();
        manager
            .register(svc::LINK, link)
            .expect("link registration should succeed");
        manager
            .register(svc::VIDEO, video)
            .expect("video registration should succeed");

        let status_interval = config.link_config().status_interval;
        (
            BridgeShared {
                manager,
                config,
                link: handle,
                status_interval,
            },
            control,
        )
    }

    #[test]
    fn hello_must_name_a_known_topic() {
        let good = BridgeFrame::json(CHANNEL_CONTROL, &json!({"topic": "status"}))
            .expect("hello should serialize");
        assert_eq!(parse_hello(&good).expect("hello should parse"), Topic::Status);

        let wrong_channel = BridgeFrame::new(Topic::Video.channel(), &b"{\"topic\":\"video\"}"[..]);
        assert!(matches!(
            parse_hello(&wrong_channel),
            Err(BridgeError::BadHello)
        ));

        let not_json = BridgeFrame::new(CHANNEL_CONTROL, &b"topic=video"[..]);
        assert!(matches!(parse_hello(&not_json), Err(BridgeError::BadHello)));

        let unknown = BridgeFrame::json(CHANNEL_CONTROL, &json!({"topic": "telemetry"}))
            .expect("hello should serialize");
        assert!(matches!(
            parse_hello(&unknown),
            Err(BridgeError::UnknownTopic(name)) if name == "telemetry"
        ));
    }

    #[test]
    fn unconfigured_gateway_refuses_every_topic() {
        let (shared, _control) = shared_with(GatewayConfig::default());
        for topic in [Topic::Commands, Topic::Video, Topic::Status, Topic::Ctrl] {
            assert!(matches!(
                check_gate(&shared, topic),
                Err(BridgeError::AuthorizationDenied { .. })
            ));
        }
    }

    #[test]
    fn video_gate_needs_camera_and_enable() {
        let (shared, control) = shared_with(configured("M5"));
        assert!(check_gate(&shared, Topic::Commands).is_ok());
        assert!(check_gate(&shared, Topic::Ctrl).is_ok());

        // Camera model, but video not enabled yet.
        assert!(matches!(
            check_gate(&shared, Topic::Video),
            Err(BridgeError::AuthorizationDenied { reason, .. })
                if reason == "video is not enabled"
        ));

        control.set_enabled(true);
        assert!(check_gate(&shared, Topic::Video).is_ok());
    }

    #[test]
    fn cameraless_model_never_serves_video() {
        let (shared, control) = shared_with(configured("V8110"));
        control.set_enabled(true);
        assert!(matches!(
            check_gate(&shared, Topic::Video),
            Err(BridgeError::AuthorizationDenied { reason, .. })
                if reason == "model has no camera"
        ));
    }
}
