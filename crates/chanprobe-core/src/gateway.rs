//! ---
//! probe_section: "01-validation-engine"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Collection and validation engine for conformance runs."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Observable reactions of the wire-level client, consumed by one dispatch
/// loop. The engine never sees frames, only these events.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Subscription acknowledged; `data` carries the proxy-injected snapshot.
    Subscribed { channel: String, data: JsonValue },
    /// One streamed message delivered after subscription.
    Publication { channel: String, data: JsonValue },
    /// Connection lifecycle: the gateway dropped the link.
    Disconnected { reason: Option<String> },
}

/// Failures raised by gateway client implementations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connect to `{url}` failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("gateway handshake failed: {0}")]
    Handshake(String),
    #[error("subscribe to `{channel}` failed: {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("connection closed by the gateway")]
    Closed,
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-side view of the messaging gateway under test.
///
/// Implementations own the connection; the orchestrator only subscribes,
/// drains events and disconnects. `next_event` must be cancellation-safe
/// because it races the collection monitor inside one `select!`.
/// `disconnect` must be idempotent.
#[async_trait]
pub trait Gateway: Send {
    /// Subscribe to a channel. The snapshot arrives later as a
    /// [`GatewayEvent::Subscribed`] event.
    async fn subscribe(&mut self, channel: &str) -> Result<(), GatewayError>;

    /// Next event from the connection, `None` once the stream has ended.
    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, GatewayError>;

    /// Release the connection. Safe to call on an already-closed connection.
    async fn disconnect(&mut self) -> Result<(), GatewayError>;
}
