//! ---
//! probe_section: "02-gateway-client"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Gateway client transports."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use std::collections::VecDeque;

use async_trait::async_trait;

use chanprobe_core::{Gateway, GatewayError, GatewayEvent};

/// In-memory gateway replaying a fixed event script, primarily for tests
/// and single-process integration.
///
/// Once the script is drained the connection either idles (a realistic
/// quiet link) or reports end-of-stream, depending on the constructor.
/// Subscribe and disconnect calls are recorded for assertions.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    events: VecDeque<GatewayEvent>,
    end_when_drained: bool,
    subscribed: Vec<String>,
    disconnects: usize,
}

impl ScriptedGateway {
    /// Script that idles after the last event.
    pub fn new(events: impl IntoIterator<Item = GatewayEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Script whose connection ends after the last event.
    pub fn ending_after(events: impl IntoIterator<Item = GatewayEvent>) -> Self {
        Self {
            end_when_drained: true,
            ..Self::new(events)
        }
    }

    /// Append another event to the script.
    pub fn queue(&mut self, event: GatewayEvent) {
        self.events.push_back(event);
    }

    /// Channels subscribed so far, in call order.
    pub fn subscribed_channels(&self) -> &[String] {
        &self.subscribed
    }

    /// How many times `disconnect` was invoked.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn subscribe(&mut self, channel: &str) -> Result<(), GatewayError> {
        self.subscribed.push(channel.to_owned());
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, GatewayError> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.end_when_drained => Ok(None),
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        self.disconnects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_the_script_in_order_and_records_calls() {
        let mut gateway = ScriptedGateway::ending_after([
            GatewayEvent::Subscribed {
                channel: "a".to_owned(),
                data: json!({}),
            },
            GatewayEvent::Publication {
                channel: "a".to_owned(),
                data: json!({"val": {"integer": 151}}),
            },
        ]);

        gateway.subscribe("a").await.unwrap();
        assert_eq!(gateway.subscribed_channels(), ["a".to_owned()]);

        assert!(matches!(
            gateway.next_event().await.unwrap(),
            Some(GatewayEvent::Subscribed { .. })
        ));
        assert!(matches!(
            gateway.next_event().await.unwrap(),
            Some(GatewayEvent::Publication { .. })
        ));
        assert_eq!(gateway.next_event().await.unwrap(), None);

        gateway.disconnect().await.unwrap();
        gateway.disconnect().await.unwrap();
        assert_eq!(gateway.disconnect_count(), 2);
    }
}
