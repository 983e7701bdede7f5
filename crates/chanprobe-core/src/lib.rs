//! ---
//! probe_section: "01-validation-engine"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Collection and validation engine for conformance runs."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
//! Core engine of the chanprobe harness.
//!
//! One conformance run manages a pair of channel subscriptions against a
//! messaging gateway, accumulates publications until a sufficiency predicate
//! is met or a hard timeout fires, and validates the initial snapshots and
//! every buffered publication against the scenario's rule set.

pub mod error;
pub mod gateway;
pub mod monitor;
pub mod orchestrator;
pub mod rules;
pub mod subscription;

pub use error::ProbeError;
pub use gateway::{Gateway, GatewayError, GatewayEvent};
pub use monitor::{CollectionMonitor, CollectionResult, MonitorTick, SufficiencyPredicate};
pub use orchestrator::{TestOrchestrator, Verdict};
pub use rules::{FailureReason, FieldRule, PayloadRole, RuleSet, ValidationFailure};
pub use subscription::{ChannelKind, ChannelSubscription, SubscriptionState};

/// Shared result type for engine operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
