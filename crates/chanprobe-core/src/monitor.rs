//! ---
//! probe_section: "01-validation-engine"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Collection and validation engine for conformance runs."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::trace;

use chanprobe_common::config::SufficiencyConfig;

use crate::rules::{lookup, RuleSet};

/// Outcome of one collection window; derived, consumed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionResult {
    /// The sufficiency predicate became true before the deadline.
    Sufficient,
    /// The deadline elapsed first; a hard failure for the caller.
    TimedOut,
}

/// What the monitor's next wakeup means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTick {
    /// Time to re-check the sufficiency predicate.
    Poll,
    /// The overall deadline fired; the pending poll is cancelled with it.
    Deadline,
}

/// Pluggable condition under which the probe stops waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SufficiencyPredicate {
    /// Total buffered publications reached `minimum`.
    Count { minimum: usize },
    /// Every tracked field appears in at least `minimum` buffered
    /// publications. A message containing none of the tracked fields counts
    /// toward none of them; that is legal, not an error.
    Coverage { fields: Vec<String>, minimum: usize },
}

impl SufficiencyPredicate {
    /// Resolve the configured mode against the scenario's rule set; coverage
    /// tracks exactly the rule set's fields.
    pub fn from_config(config: &SufficiencyConfig, rules: &RuleSet) -> Self {
        match config {
            SufficiencyConfig::Count { minimum } => Self::Count { minimum: *minimum },
            SufficiencyConfig::Coverage { minimum } => Self::Coverage {
                fields: rules.tracked_fields(),
                minimum: *minimum,
            },
        }
    }

    /// Evaluate the predicate over the buffered publications.
    pub fn satisfied(&self, buffer: &[JsonValue]) -> bool {
        match self {
            Self::Count { minimum } => buffer.len() >= *minimum,
            Self::Coverage { fields, minimum } => fields.iter().all(|field| {
                let count = buffer
                    .iter()
                    .filter(|message| lookup(message, field).is_some())
                    .count();
                trace!(field = %field, count, minimum, "coverage check");
                count >= *minimum
            }),
        }
    }
}

/// Periodic sufficiency polling with a hard overall deadline.
///
/// First poll that finds the predicate satisfied wins; if the deadline
/// elapses first the window resolves `TimedOut`. Both timers live in one
/// select, so the deadline firing leaves no orphaned poll timer behind.
#[derive(Debug)]
pub struct CollectionMonitor {
    poll: Interval,
    deadline: Instant,
    timeout: Duration,
}

impl CollectionMonitor {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        let mut poll = interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            poll,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// The configured overall bound, for diagnostics.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve on the next poll tick, or on the deadline, whichever comes
    /// first. At the bound itself the deadline wins.
    pub async fn next_check(&mut self) -> MonitorTick {
        tokio::select! {
            biased;
            () = sleep_until(self.deadline) => MonitorTick::Deadline,
            _ = self.poll.tick() => MonitorTick::Poll,
        }
    }

    /// Await sufficiency of `probe`, first-true-wins, hard timeout.
    pub async fn wait(mut self, mut probe: impl FnMut() -> bool) -> CollectionResult {
        loop {
            match self.next_check().await {
                MonitorTick::Deadline => return CollectionResult::TimedOut,
                MonitorTick::Poll => {
                    if probe() {
                        return CollectionResult::Sufficient;
                    }
                }
            }
        }
    }
}
