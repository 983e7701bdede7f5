//! ---
//! probe_section: "01-validation-engine"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Collection and validation engine for conformance runs."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use chanprobe_common::config::ProbeConfig;

use crate::error::ProbeError;
use crate::gateway::{Gateway, GatewayError, GatewayEvent};
use crate::monitor::{CollectionMonitor, CollectionResult, MonitorTick, SufficiencyPredicate};
use crate::rules::{PayloadRole, RuleSet};
use crate::subscription::{ChannelKind, ChannelSubscription};

const PUBLICATION_CONTEXT: &str = "publication";

/// Single pass/fail outcome of a conformance run.
#[derive(Debug)]
pub enum Verdict {
    Pass,
    Fail(ProbeError),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Composes subscriptions, monitor and rule set into one conformance run.
///
/// A run is single-use: subscribe both channels, dispatch gateway events and
/// monitor checks on one cooperative loop, tear the connection down on every
/// exit path, then batch-validate the buffered publications.
#[derive(Debug)]
pub struct TestOrchestrator {
    rules: Arc<RuleSet>,
    predicate: SufficiencyPredicate,
    nodata: ChannelSubscription,
    data: ChannelSubscription,
    poll_interval: Duration,
    timeout: Duration,
}

impl TestOrchestrator {
    pub fn new(config: &ProbeConfig) -> Self {
        let rules = Arc::new(RuleSet::from_scenario(&config.scenario));
        let predicate = SufficiencyPredicate::from_config(&config.scenario.sufficiency, &rules);
        Self {
            nodata: ChannelSubscription::open(
                config.channels.nodata_channel(),
                ChannelKind::NoData,
                rules.clone(),
            ),
            data: ChannelSubscription::open(
                config.channels.data_channel(),
                ChannelKind::Data,
                rules.clone(),
            ),
            predicate,
            poll_interval: config.scenario.poll_interval,
            timeout: config.scenario.timeout,
            rules,
        }
    }

    /// Run the scenario against a connected gateway and produce the verdict.
    ///
    /// The connection is released on every exit path, including timeout and
    /// validation failure, before the verdict is reported.
    pub async fn run<G: Gateway>(mut self, gateway: &mut G) -> Verdict {
        let outcome = self.drive(gateway).await;

        if let Err(err) = gateway.disconnect().await {
            warn!(error = %err, "disconnect after run failed");
        }
        self.nodata.close();
        self.data.close();

        let verdict = match outcome {
            Ok(resolution) => self.finalize(resolution),
            Err(err) => Verdict::Fail(err),
        };

        match &verdict {
            Verdict::Pass => {
                info!(publications = self.data.buffer().len(), "conformance run passed");
            }
            Verdict::Fail(reason) => error!(%reason, "conformance run failed"),
        }
        verdict
    }

    async fn drive<G: Gateway>(&mut self, gateway: &mut G) -> Result<CollectionResult, ProbeError> {
        gateway.subscribe(self.nodata.name()).await?;
        self.nodata.mark_subscribing();
        gateway.subscribe(self.data.name()).await?;
        self.data.mark_subscribing();

        info!(
            nodata_channel = %self.nodata.name(),
            data_channel = %self.data.name(),
            predicate = ?self.predicate,
            timeout_ms = self.timeout.as_millis() as u64,
            "collection window opened"
        );

        let mut monitor = CollectionMonitor::new(self.poll_interval, self.timeout);
        loop {
            tokio::select! {
                tick = monitor.next_check() => match tick {
                    MonitorTick::Deadline => return Ok(CollectionResult::TimedOut),
                    MonitorTick::Poll => {
                        if self.predicate.satisfied(self.data.buffer()) {
                            return Ok(CollectionResult::Sufficient);
                        }
                    }
                },
                event = gateway.next_event() => match event? {
                    Some(event) => self.dispatch(event)?,
                    None => return Err(GatewayError::Closed.into()),
                },
            }
        }
    }

    fn dispatch(&mut self, event: GatewayEvent) -> Result<(), ProbeError> {
        match event {
            GatewayEvent::Subscribed { channel, data } => match self.subscription_mut(&channel) {
                Some(subscription) => subscription.on_snapshot(data),
                None => {
                    warn!(channel = %channel, "snapshot for unknown channel ignored");
                    Ok(())
                }
            },
            GatewayEvent::Publication { channel, data } => match self.subscription_mut(&channel) {
                Some(subscription) => subscription.on_publication(data),
                None => {
                    warn!(channel = %channel, "publication for unknown channel ignored");
                    Ok(())
                }
            },
            GatewayEvent::Disconnected { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("none"), "gateway dropped the connection");
                Err(GatewayError::Closed.into())
            }
        }
    }

    fn subscription_mut(&mut self, channel: &str) -> Option<&mut ChannelSubscription> {
        if channel == self.nodata.name() {
            Some(&mut self.nodata)
        } else if channel == self.data.name() {
            Some(&mut self.data)
        } else {
            None
        }
    }

    /// Final batch validation over everything buffered during the window.
    ///
    /// A value violation found here outranks the timeout as the reported
    /// reason: it is the more actionable diagnostic, and the buffered
    /// evidence exists whether or not the window filled up.
    fn finalize(&self, resolution: CollectionResult) -> Verdict {
        for payload in self.data.buffer() {
            if let Err(failure) =
                self.rules
                    .validate(payload, PayloadRole::Publication, PUBLICATION_CONTEXT)
            {
                let err = if failure.is_structural() {
                    ProbeError::ProtocolViolation {
                        channel: self.data.name().to_owned(),
                        detail: failure.to_string(),
                    }
                } else {
                    ProbeError::Validation(failure)
                };
                return Verdict::Fail(err);
            }
        }

        if resolution == CollectionResult::TimedOut {
            return Verdict::Fail(ProbeError::Timeout(self.timeout));
        }

        if !self.nodata.snapshot_seen() {
            return Verdict::Fail(ProbeError::ProtocolViolation {
                channel: self.nodata.name().to_owned(),
                detail: "channel never completed its subscribe handshake".to_owned(),
            });
        }

        Verdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};

    use chanprobe_common::config::{PayloadShape, RangeRuleConfig, SufficiencyConfig};

    /// Scripted gateway: replays a fixed event sequence, then either idles
    /// (realistic quiet connection) or reports the stream as ended.
    struct ScriptedGateway {
        events: VecDeque<GatewayEvent>,
        idle_when_drained: bool,
        subscribed: Vec<String>,
        disconnects: usize,
    }

    impl ScriptedGateway {
        fn new(events: Vec<GatewayEvent>) -> Self {
            Self {
                events: events.into(),
                idle_when_drained: true,
                subscribed: Vec::new(),
                disconnects: 0,
            }
        }

        fn ending_after(events: Vec<GatewayEvent>) -> Self {
            Self {
                idle_when_drained: false,
                ..Self::new(events)
            }
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
                None if self.idle_when_drained => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn disconnect(&mut self) -> Result<(), GatewayError> {
            self.disconnects += 1;
            Ok(())
        }
    }

    fn config(sufficiency: SufficiencyConfig) -> ProbeConfig {
        let mut config = ProbeConfig::default();
        config.scenario.sufficiency = sufficiency;
        config
    }

    fn nodata_subscribed() -> GatewayEvent {
        GatewayEvent::Subscribed {
            channel: "testdb.testcoll:nodata".to_owned(),
            data: json!({}),
        }
    }

    fn data_subscribed() -> GatewayEvent {
        GatewayEvent::Subscribed {
            channel: "testdb.testcoll:integration-tests".to_owned(),
            data: json!({
                "val": {"integer": 155, "float": 33.0},
                "ts": {"first": "2024-05-17T08:00:00Z", "second": "2024-05-17T08:00:01Z"}
            }),
        }
    }

    fn publication(data: JsonValue) -> GatewayEvent {
        GatewayEvent::Publication {
            channel: "testdb.testcoll:integration-tests".to_owned(),
            data,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn count_scenario_passes_and_tears_down() {
        let config = config(SufficiencyConfig::Count { minimum: 2 });
        let mut gateway = ScriptedGateway::new(vec![
            nodata_subscribed(),
            data_subscribed(),
            publication(json!({"val": {"integer": 151}})),
            publication(json!({"val": {"float": 34.5}})),
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(verdict.is_pass(), "unexpected verdict: {verdict:?}");
        assert_eq!(
            gateway.subscribed,
            vec!["testdb.testcoll:nodata", "testdb.testcoll:integration-tests"]
        );
        assert_eq!(gateway.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn coverage_scenario_waits_for_every_tracked_field() {
        let config = config(SufficiencyConfig::Coverage { minimum: 1 });
        let mut gateway = ScriptedGateway::new(vec![
            nodata_subscribed(),
            data_subscribed(),
            publication(json!({"val": {"integer": 151, "float": 33.5}})),
            publication(json!({
                "ts": {"first": "2024-05-17T09:00:00Z", "second": "2024-05-17T09:00:01Z"}
            })),
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(verdict.is_pass(), "unexpected verdict: {verdict:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_publication_fails_batch_validation() {
        // The worked reference scenario: count >= 5, integer in [150, 250],
        // float in [32, 42], flat payloads, second publication out of range.
        let mut config = config(SufficiencyConfig::Count { minimum: 5 });
        config.scenario.shape = PayloadShape::Flat;
        config.scenario.rules.integer = RangeRuleConfig {
            lower: 150.0,
            upper: 250.0,
            mandatory_in_snapshot: false,
        };
        config.scenario.rules.float = RangeRuleConfig {
            lower: 32.0,
            upper: 42.0,
            mandatory_in_snapshot: false,
        };
        config.scenario.rules.timestamps.mandatory_in_snapshot = false;

        let mut gateway = ScriptedGateway::new(vec![
            nodata_subscribed(),
            GatewayEvent::Subscribed {
                channel: "testdb.testcoll:integration-tests".to_owned(),
                data: json!({}),
            },
            publication(json!({"integer": 155, "float": 33.1})),
            publication(json!({"integer": 260, "float": 34.0})),
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        match verdict {
            Verdict::Fail(ProbeError::Validation(failure)) => {
                assert_eq!(
                    failure.to_string(),
                    "publication: `integer` value 260 out of [150, 250]"
                );
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(gateway.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publication_on_nodata_channel_fails_regardless_of_payload() {
        let config = config(SufficiencyConfig::Count { minimum: 1 });
        let mut gateway = ScriptedGateway::new(vec![
            nodata_subscribed(),
            data_subscribed(),
            GatewayEvent::Publication {
                channel: "testdb.testcoll:nodata".to_owned(),
                data: json!({}),
            },
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(matches!(
            verdict,
            Verdict::Fail(ProbeError::ProtocolViolation { .. })
        ));
        assert_eq!(gateway.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stream_times_out_and_still_releases_the_connection() {
        let config = config(SufficiencyConfig::Count { minimum: 4 });
        let timeout = config.scenario.timeout;
        let started = tokio::time::Instant::now();
        let mut gateway = ScriptedGateway::new(vec![nodata_subscribed(), data_subscribed()]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(matches!(
            verdict,
            Verdict::Fail(ProbeError::Timeout(t)) if t == timeout
        ));
        assert_eq!(started.elapsed(), timeout);
        assert_eq!(gateway.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_nodata_handshake_fails_the_run() {
        let config = config(SufficiencyConfig::Count { minimum: 1 });
        let mut gateway = ScriptedGateway::new(vec![
            data_subscribed(),
            publication(json!({"val": {"integer": 151}})),
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        match verdict {
            Verdict::Fail(ProbeError::ProtocolViolation { channel, .. }) => {
                assert_eq!(channel, "testdb.testcoll:nodata");
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ended_event_stream_is_a_transport_failure() {
        let config = config(SufficiencyConfig::Count { minimum: 4 });
        let mut gateway =
            ScriptedGateway::ending_after(vec![nodata_subscribed(), data_subscribed()]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(matches!(
            verdict,
            Verdict::Fail(ProbeError::Transport(GatewayError::Closed))
        ));
        assert_eq!(gateway.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_event_mid_run_is_a_transport_failure() {
        let config = config(SufficiencyConfig::Count { minimum: 4 });
        let mut gateway = ScriptedGateway::new(vec![
            nodata_subscribed(),
            data_subscribed(),
            GatewayEvent::Disconnected {
                reason: Some("shutting down".to_owned()),
            },
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(matches!(
            verdict,
            Verdict::Fail(ProbeError::Transport(GatewayError::Closed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn events_for_unknown_channels_are_ignored() {
        let config = config(SufficiencyConfig::Count { minimum: 1 });
        let mut gateway = ScriptedGateway::new(vec![
            nodata_subscribed(),
            data_subscribed(),
            GatewayEvent::Publication {
                channel: "testdb.testcoll:other".to_owned(),
                data: json!({"val": {"integer": 9999}}),
            },
            publication(json!({"val": {"integer": 151}})),
        ]);

        let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
        assert!(verdict.is_pass(), "unexpected verdict: {verdict:?}");
    }
}
