#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use fabgate::bridge::{BridgeClient, BridgeListener, Topic, CHANNEL_COMMANDS, CHANNEL_VIDEO};
use fabgate::config::{GatewayConfig, PrinterProfile};
use fabgate::event::GatewayEvent;
use fabgate::sim::{SimCommandTransport, SimLinkTransport, SimPrinter};
use fabgate::svc::{self, command::CommandService, transfer::TransferService, video::VideoService};
use fabgate_link::{LinkSupervisor, SessionCommand};
use fabgate_service::ServiceManager;

const DEVICE_ID: &str = "GWTEST01";

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/fabgate-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn configured() -> GatewayConfig {
    GatewayConfig {
        printers: vec![PrinterProfile {
            name: "bench".to_string(),
            model: "M5".to_string(),
            device_id: DEVICE_ID.to_string(),
            command_addr: "127.0.0.1:8899".to_string(),
            p2p_addr: "127.0.0.1:8898".to_string(),
        }],
        ..GatewayConfig::default()
    }
}

struct Gateway {
    manager: ServiceManager<GatewayEvent>,
    printer: SimPrinter,
    socket: PathBuf,
    dir: PathBuf,
    cancel: CancellationToken,
}

impl Gateway {
    async fn teardown(self) {
        self.cancel.cancel();
        self.manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn start_gateway_with(tag: &str, config: GatewayConfig) -> Gateway {
    let sim = SimLinkTransport::new();
    let printer = sim.printer();
    let link = LinkSupervisor::new(sim, config.link_config());
    let handle = link.handle();
    let commands = CommandService::new(SimCommandTransport::new(DEVICE_ID));
    let video = VideoService::new(handle.clone());
    let transfer = TransferService::new(handle.clone(), config.transfer_config());

    let manager: ServiceManager<GatewayEvent> = ServiceManager::new();
    manager
        .register(svc::LINK, link)
        .expect("link registration should succeed");
    manager
        .register(svc::COMMANDS, commands)
        .expect("commands registration should succeed");
    manager
        .register(svc::VIDEO, video)
        .expect("video registration should succeed");
    manager
        .register(svc::TRANSFER, transfer)
        .expect("transfer registration should succeed");

    manager.start(svc::LINK).await.expect("link should come up");
    manager
        .start(svc::COMMANDS)
        .await
        .expect("commands should come up");

    let dir = unique_temp_dir(tag);
    let socket = dir.join("bridge.sock");
    let listener = BridgeListener::bind(&socket, manager.clone(), config, handle)
        .expect("bridge should bind");
    let cancel = CancellationToken::new();
    tokio::spawn(listener.run(cancel.clone()));

    Gateway {
        manager,
        printer,
        socket,
        dir,
        cancel,
    }
}

async fn start_gateway(tag: &str) -> Gateway {
    start_gateway_with(tag, configured()).await
}

async fn wait_until(mut cond: impl FnMut() -> bool, limit: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

#[tokio::test]
async fn ctrl_greets_and_reports_status() {
    let gateway = start_gateway("ctrl").await;

    let mut client = BridgeClient::connect(&gateway.socket, Topic::Ctrl)
        .await
        .expect("ctrl should attach");
    let ready = client
        .recv_json()
        .await
        .expect("greeting should be readable")
        .expect("connection should stay open");
    assert_eq!(ready.get("fabgate").and_then(Value::as_u64), Some(1));

    client
        .send_json(&json!({ "status": true }))
        .await
        .expect("status request should send");
    let reply = client
        .recv_json()
        .await
        .expect("reply should be readable")
        .expect("connection should stay open");

    assert_eq!(reply.get("link").and_then(Value::as_bool), Some(true));
    let services = reply
        .get("services")
        .and_then(Value::as_array)
        .expect("reply should list services");
    let link = services
        .iter()
        .find(|s| s.get("name").and_then(Value::as_str) == Some("link"))
        .expect("link service should be listed");
    assert_eq!(link.get("state").and_then(Value::as_str), Some("running"));
    assert_eq!(link.get("online").and_then(Value::as_bool), Some(true));

    gateway.teardown().await;
}

#[tokio::test]
async fn commands_topic_delivers_base64_envelopes() {
    let gateway = start_gateway("commands").await;

    let mut client = BridgeClient::connect(&gateway.socket, Topic::Commands)
        .await
        .expect("commands should attach");
    let frame = tokio::time::timeout(Duration::from_secs(10), client.recv())
        .await
        .expect("a report should arrive")
        .expect("stream should be readable")
        .expect("connection should stay open");
    assert_eq!(frame.channel, CHANNEL_COMMANDS);

    let envelope: Value =
        serde_json::from_slice(&frame.payload).expect("envelope should be JSON");
    assert_eq!(
        envelope.get("device").and_then(Value::as_str),
        Some(DEVICE_ID)
    );
    let encoded = envelope
        .get("payload")
        .and_then(Value::as_str)
        .expect("envelope should carry a payload");
    let payload = BASE64.decode(encoded).expect("payload should be base64");
    assert!(payload.starts_with(b"CMD M105"));
    assert_eq!(
        envelope.get("len").and_then(Value::as_u64),
        Some(payload.len() as u64)
    );

    gateway.teardown().await;
}

#[tokio::test]
async fn status_topic_reports_the_connected_edge() {
    let gateway = start_gateway("status").await;

    let mut client = BridgeClient::connect(&gateway.socket, Topic::Status)
        .await
        .expect("status should attach");
    let doc = tokio::time::timeout(Duration::from_secs(5), client.recv_json())
        .await
        .expect("an edge should arrive")
        .expect("stream should be readable")
        .expect("connection should stay open");
    assert_eq!(doc.get("status").and_then(Value::as_str), Some("connected"));

    gateway.teardown().await;
}

#[tokio::test]
async fn video_flows_only_after_ctrl_enables_it() {
    let gateway = start_gateway("video").await;

    // Gate unmet: the connection closes before any data.
    let mut refused = BridgeClient::connect(&gateway.socket, Topic::Video)
        .await
        .expect("socket should accept");
    assert!(matches!(refused.recv().await, Ok(None)));

    let mut ctrl = BridgeClient::connect(&gateway.socket, Topic::Ctrl)
        .await
        .expect("ctrl should attach");
    ctrl.recv_json()
        .await
        .expect("greeting should be readable")
        .expect("connection should stay open");
    ctrl.send_json(&json!({ "video_enabled": true }))
        .await
        .expect("enable should send");
    // A status round-trip orders us after the enable was processed.
    ctrl.send_json(&json!({ "status": true }))
        .await
        .expect("status request should send");
    let reply = ctrl
        .recv_json()
        .await
        .expect("reply should be readable")
        .expect("connection should stay open");
    let services = reply
        .get("services")
        .and_then(Value::as_array)
        .expect("reply should list services");
    let video = services
        .iter()
        .find(|s| s.get("name").and_then(Value::as_str) == Some("video"))
        .expect("video service should be listed");
    assert_eq!(video.get("state").and_then(Value::as_str), Some("running"));

    let mut client = BridgeClient::connect(&gateway.socket, Topic::Video)
        .await
        .expect("video should attach once enabled");
    let frame = tokio::time::timeout(Duration::from_secs(10), client.recv())
        .await
        .expect("a camera frame should arrive")
        .expect("stream should be readable")
        .expect("connection should stay open");
    assert_eq!(frame.channel, CHANNEL_VIDEO);
    assert!(frame.payload.starts_with(&[0xFF, 0xD8]));

    gateway.teardown().await;
}

#[tokio::test]
async fn ctrl_settings_reach_the_printer() {
    let gateway = start_gateway("settings").await;

    let mut ctrl = BridgeClient::connect(&gateway.socket, Topic::Ctrl)
        .await
        .expect("ctrl should attach");
    ctrl.recv_json()
        .await
        .expect("greeting should be readable")
        .expect("connection should stay open");
    // One document, two recognized keys plus an ignored one.
    ctrl.send_json(&json!({ "light": true, "quality": 2, "nonsense": [1, 2] }))
        .await
        .expect("settings should send");

    let printer = gateway.printer.clone();
    let delivered = wait_until(
        || {
            let commands = printer.commands();
            commands
                .iter()
                .any(|c| matches!(c, SessionCommand::LightState(true)))
                && commands
                    .iter()
                    .any(|c| matches!(c, SessionCommand::LiveMode(2)))
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(delivered, "light and quality should reach the session");

    // The unrecognized key did not cost us the connection.
    ctrl.send_json(&json!({ "status": true }))
        .await
        .expect("status request should send");
    assert!(ctrl
        .recv_json()
        .await
        .expect("reply should be readable")
        .is_some());

    gateway.teardown().await;
}

#[tokio::test]
async fn unconfigured_gateway_closes_every_topic() {
    let gateway = start_gateway_with("unconfigured", GatewayConfig::default()).await;

    for topic in [Topic::Commands, Topic::Video, Topic::Status, Topic::Ctrl] {
        let mut client = BridgeClient::connect(&gateway.socket, topic)
            .await
            .expect("socket should accept");
        assert!(
            matches!(client.recv().await, Ok(None)),
            "{topic} should close without data"
        );
    }

    gateway.teardown().await;
}
