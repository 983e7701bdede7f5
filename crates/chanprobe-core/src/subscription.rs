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

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::ProbeError;
use crate::rules::{PayloadRole, RuleSet};

/// Label attached to snapshot validation failures; the snapshot payload is
/// injected by the gateway's subscribe proxy.
const SNAPSHOT_CONTEXT: &str = "subscribe proxy";

/// Declared behaviour of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Snapshot must be an empty object; publications are forbidden.
    NoData,
    /// Snapshot carries all mandatory fields; publications stream after it.
    Data,
}

/// Subscription lifecycle. `Closed` is terminal; no mutation after close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Accumulating,
    Closed,
}

/// One logical channel: subscription state, the initial snapshot, and the
/// ordered buffer of accepted publications.
///
/// The buffer is append-only with a single writer (the event dispatch loop)
/// and a single reader (the monitor's poll checks and the final batch
/// validation); the serial scheduler makes explicit synchronization
/// unnecessary.
#[derive(Debug)]
pub struct ChannelSubscription {
    name: String,
    kind: ChannelKind,
    state: SubscriptionState,
    rules: Arc<RuleSet>,
    snapshot: Option<JsonValue>,
    buffer: Vec<JsonValue>,
}

impl ChannelSubscription {
    /// Create a handle for `name`; no wire activity happens here.
    pub fn open(name: impl Into<String>, kind: ChannelKind, rules: Arc<RuleSet>) -> Self {
        Self {
            name: name.into(),
            kind,
            state: SubscriptionState::Unsubscribed,
            rules,
            snapshot: None,
            buffer: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Whether the subscribe handshake completed and delivered a snapshot.
    pub fn snapshot_seen(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Publications accepted so far, in arrival order.
    pub fn buffer(&self) -> &[JsonValue] {
        &self.buffer
    }

    /// Record that the subscribe request went out.
    pub fn mark_subscribing(&mut self) {
        if self.state == SubscriptionState::Unsubscribed {
            self.state = SubscriptionState::Subscribing;
        }
    }

    /// React to the snapshot delivered with the subscribe acknowledgement.
    ///
    /// At most once per subscription; the snapshot is validated immediately
    /// and an invalid one aborts the whole run.
    pub fn on_snapshot(&mut self, payload: JsonValue) -> Result<(), ProbeError> {
        match self.state {
            SubscriptionState::Closed => {
                debug!(channel = %self.name, "snapshot after close ignored");
                return Ok(());
            }
            SubscriptionState::Unsubscribed | SubscriptionState::Subscribing => {}
            SubscriptionState::Subscribed | SubscriptionState::Accumulating => {
                return Err(ProbeError::ProtocolViolation {
                    channel: self.name.clone(),
                    detail: "duplicate snapshot delivery".to_owned(),
                });
            }
        }

        let role = match self.kind {
            ChannelKind::NoData => PayloadRole::NoDataSnapshot,
            ChannelKind::Data => PayloadRole::Snapshot,
        };
        debug!(channel = %self.name, ?role, %payload, "snapshot received");

        if let Err(failure) = self.rules.validate(&payload, role, SNAPSHOT_CONTEXT) {
            if failure.is_structural() {
                return Err(ProbeError::ProtocolViolation {
                    channel: self.name.clone(),
                    detail: failure.to_string(),
                });
            }
            return Err(ProbeError::Validation(failure));
        }

        self.snapshot = Some(payload);
        self.state = SubscriptionState::Subscribed;
        Ok(())
    }

    /// React to a streamed publication.
    ///
    /// On a no-data channel any publication is an unconditional protocol
    /// violation, regardless of payload. On a data channel the message is
    /// appended to the buffer; value validation happens in the final batch
    /// pass.
    pub fn on_publication(&mut self, payload: JsonValue) -> Result<(), ProbeError> {
        if self.state == SubscriptionState::Closed {
            debug!(channel = %self.name, "publication after close ignored");
            return Ok(());
        }

        if self.kind == ChannelKind::NoData {
            return Err(ProbeError::ProtocolViolation {
                channel: self.name.clone(),
                detail: "unexpected publication on no-data channel".to_owned(),
            });
        }

        if matches!(
            self.state,
            SubscriptionState::Unsubscribed | SubscriptionState::Subscribing
        ) {
            return Err(ProbeError::ProtocolViolation {
                channel: self.name.clone(),
                detail: "publication delivered before snapshot".to_owned(),
            });
        }

        debug!(channel = %self.name, %payload, "publication received");
        self.buffer.push(payload);
        self.state = SubscriptionState::Accumulating;
        Ok(())
    }

    /// Terminal transition on disconnect; idempotent.
    pub fn close(&mut self) {
        self.state = SubscriptionState::Closed;
    }
}
