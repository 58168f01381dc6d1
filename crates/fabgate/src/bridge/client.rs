use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use super::codec::{BridgeCodec, BridgeFrame, CHANNEL_CONTROL};
use super::{BridgeError, Topic};

/// One attached bridge connection. `connect` sends the topic hello;
/// everything after that is frames on the topic's terms.
pub struct BridgeClient {
    framed: Framed<UnixStream, BridgeCodec>,
    topic: Topic,
}

impl BridgeClient {
    pub async fn connect(path: impl AsRef<Path>, topic: Topic) -> Result<Self, BridgeError> {
        let stream = UnixStream::connect(path).await?;
        let mut framed = Framed::new(stream, BridgeCodec);
        framed
            .send(BridgeFrame::json(
                CHANNEL_CONTROL,
                &json!({ "topic": topic.name() }),
            )?)
            .await?;
        Ok(Self { framed, topic })
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Send one control document.
    pub async fn send_json(&mut self, doc: &Value) -> Result<(), BridgeError> {
        self.framed
            .send(BridgeFrame::json(CHANNEL_CONTROL, doc)?)
            .await
    }

    /// Next frame; `None` once the gateway closes the connection.
    pub async fn recv(&mut self) -> Result<Option<BridgeFrame>, BridgeError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(frame) => frame.map(Some),
        }
    }

    /// Next frame decoded as a JSON document.
    pub async fn recv_json(&mut self) -> Result<Option<Value>, BridgeError> {
        match self.recv().await? {
            None => Ok(None),
            Some(frame) => Ok(Some(serde_json::from_slice(&frame.payload)?)),
        }
    }
}
