//! ---
//! probe_section: "02-gateway-client"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Gateway client transports."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use chanprobe_core::{Gateway, GatewayError, GatewayEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CONNECT_ID: u64 = 1;
const CLIENT_NAME: &str = "chanprobe";
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Serialize)]
struct ConnectRequest {
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    channel: &'a str,
}

/// Command frame sent to the gateway.
#[derive(Debug, Serialize)]
struct ClientFrame<'a> {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    connect: Option<ConnectRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribe: Option<SubscribeRequest<'a>>,
}

impl<'a> ClientFrame<'a> {
    fn connect(id: u64) -> Self {
        Self {
            id,
            connect: Some(ConnectRequest { name: CLIENT_NAME }),
            subscribe: None,
        }
    }

    fn subscribe(id: u64, channel: &'a str) -> Self {
        Self {
            id,
            connect: None,
            subscribe: Some(SubscribeRequest { channel }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectResult {
    #[serde(default)]
    client: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribeResult {
    /// Snapshot injected by the subscribe proxy; the gateway omits the key
    /// entirely for channels without one, which maps to an empty object.
    #[serde(default)]
    data: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct ErrorResult {
    code: u16,
    message: String,
}

#[derive(Debug, Deserialize)]
struct PublicationPush {
    data: JsonValue,
}

#[derive(Debug, Deserialize)]
struct DisconnectPush {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Push {
    channel: String,
    #[serde(rename = "pub", default)]
    publication: Option<PublicationPush>,
    #[serde(default)]
    disconnect: Option<DisconnectPush>,
}

/// Reply or push frame received from the gateway.
#[derive(Debug, Deserialize, Default)]
struct ServerFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    connect: Option<ConnectResult>,
    #[serde(default)]
    subscribe: Option<SubscribeResult>,
    #[serde(default)]
    error: Option<ErrorResult>,
    #[serde(default)]
    push: Option<Push>,
}

impl ServerFrame {
    fn is_ping(&self) -> bool {
        self.id.is_none()
            && self.connect.is_none()
            && self.subscribe.is_none()
            && self.error.is_none()
            && self.push.is_none()
    }
}

/// WebSocket client for a Centrifugo-style messaging gateway.
///
/// The connection handshake happens in [`WsGateway::connect`]; afterwards a
/// background reader task turns server frames into [`GatewayEvent`]s on a
/// bounded queue, which makes [`Gateway::next_event`] cancellation-safe.
pub struct WsGateway {
    sink: Arc<Mutex<WsSink>>,
    events: mpsc::Receiver<GatewayEvent>,
    pending_subscribes: Arc<StdMutex<HashMap<u64, String>>>,
    reader: JoinHandle<()>,
    next_command_id: u64,
    closed: bool,
}

impl WsGateway {
    /// Establish the connection and perform the gateway handshake, bounded
    /// by `connect_timeout` end to end.
    pub async fn connect(url: &Url, connect_timeout: Duration) -> Result<Self, GatewayError> {
        let connect = async {
            let (stream, _response) =
                connect_async(url.as_str())
                    .await
                    .map_err(|err| GatewayError::Connect {
                        url: url.to_string(),
                        reason: err.to_string(),
                    })?;
            handshake(stream).await
        };
        let stream = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| GatewayError::Connect {
                url: url.to_string(),
                reason: format!("timed out after {}ms", connect_timeout.as_millis()),
            })??;
        debug!(url = %url, "gateway connection established");

        let (sink, source) = stream.split();

        let sink = Arc::new(Mutex::new(sink));
        let pending_subscribes = Arc::new(StdMutex::new(HashMap::new()));
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let reader = tokio::spawn(read_loop(
            source,
            sink.clone(),
            pending_subscribes.clone(),
            event_tx,
        ));

        Ok(Self {
            sink,
            events,
            pending_subscribes,
            reader,
            next_command_id: CONNECT_ID + 1,
            closed: false,
        })
    }

    async fn send_frame(&self, frame: &ClientFrame<'_>) -> Result<(), GatewayError> {
        let text =
            serde_json::to_string(frame).map_err(|err| GatewayError::Protocol(err.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|err| GatewayError::Protocol(err.to_string()))
    }
}

#[async_trait]
impl Gateway for WsGateway {
    async fn subscribe(&mut self, channel: &str) -> Result<(), GatewayError> {
        let id = self.next_command_id;
        self.next_command_id += 1;
        self.pending_subscribes
            .lock()
            .expect("pending subscribe map poisoned")
            .insert(id, channel.to_owned());

        debug!(channel = %channel, id, "subscribing");
        self.send_frame(&ClientFrame::subscribe(id, channel))
            .await
            .map_err(|err| GatewayError::Subscribe {
                channel: channel.to_owned(),
                reason: err.to_string(),
            })
    }

    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, GatewayError> {
        Ok(self.events.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Best effort: the gateway may already have dropped the link.
        if let Err(err) = self.sink.lock().await.send(Message::Close(None)).await {
            debug!(error = %err, "close frame not delivered");
        }
        self.reader.abort();
        debug!("gateway connection released");
        Ok(())
    }
}

impl Drop for WsGateway {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn handshake(mut stream: WsStream) -> Result<WsStream, GatewayError> {
    let connect_frame = serde_json::to_string(&ClientFrame::connect(CONNECT_ID))
        .map_err(|err| GatewayError::Handshake(err.to_string()))?;
    stream
        .send(Message::Text(connect_frame))
        .await
        .map_err(|err| GatewayError::Handshake(err.to_string()))?;

    while let Some(message) = stream.next().await {
        let message = message.map_err(|err| GatewayError::Handshake(err.to_string()))?;
        let Message::Text(text) = message else {
            continue;
        };
        for line in text.lines() {
            let frame: ServerFrame = serde_json::from_str(line)
                .map_err(|err| GatewayError::Protocol(format!("bad handshake frame: {err}")))?;
            if frame.id != Some(CONNECT_ID) {
                continue;
            }
            if let Some(error) = frame.error {
                return Err(GatewayError::Handshake(format!(
                    "code {}: {}",
                    error.code, error.message
                )));
            }
            if let Some(connect) = frame.connect {
                debug!(client = connect.client.as_deref().unwrap_or("unknown"), "handshake complete");
                return Ok(stream);
            }
        }
    }

    Err(GatewayError::Closed)
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    sink: Arc<Mutex<WsSink>>,
    pending_subscribes: Arc<StdMutex<HashMap<u64, String>>>,
    events: mpsc::Sender<GatewayEvent>,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                for line in text.lines() {
                    let frame: ServerFrame = match serde_json::from_str(line) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(error = %err, raw = line, "unparseable gateway frame dropped");
                            continue;
                        }
                    };
                    if frame.is_ping() {
                        // Application-level ping; answered in kind.
                        if sink.lock().await.send(Message::Text("{}".into())).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    if let Some(event) = frame_to_event(frame, &pending_subscribes) {
                        let ended = matches!(event, GatewayEvent::Disconnected { .. });
                        if events.send(event).await.is_err() || ended {
                            return;
                        }
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                if sink.lock().await.send(Message::Pong(payload)).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(_)) => {
                let _ = events.send(GatewayEvent::Disconnected { reason: None }).await;
                return;
            }
            Ok(_) => {}
            Err(err) => {
                let _ = events
                    .send(GatewayEvent::Disconnected {
                        reason: Some(err.to_string()),
                    })
                    .await;
                return;
            }
        }
    }
    let _ = events.send(GatewayEvent::Disconnected { reason: None }).await;
}

fn frame_to_event(
    frame: ServerFrame,
    pending_subscribes: &StdMutex<HashMap<u64, String>>,
) -> Option<GatewayEvent> {
    if let Some(id) = frame.id {
        let channel = pending_subscribes
            .lock()
            .expect("pending subscribe map poisoned")
            .remove(&id);
        let Some(channel) = channel else {
            warn!(id, "reply for unknown command id ignored");
            return None;
        };
        if let Some(error) = frame.error {
            return Some(GatewayEvent::Disconnected {
                reason: Some(format!(
                    "subscribe to `{}` failed: code {}: {}",
                    channel, error.code, error.message
                )),
            });
        }
        let data = frame
            .subscribe
            .and_then(|reply| reply.data)
            .unwrap_or_else(|| JsonValue::Object(serde_json::Map::new()));
        return Some(GatewayEvent::Subscribed { channel, data });
    }

    if let Some(push) = frame.push {
        if let Some(publication) = push.publication {
            return Some(GatewayEvent::Publication {
                channel: push.channel,
                data: publication.data,
            });
        }
        if let Some(disconnect) = push.disconnect {
            return Some(GatewayEvent::Disconnected {
                reason: disconnect.reason,
            });
        }
        debug!(channel = %push.channel, "push without publication ignored");
        return None;
    }

    None
}
