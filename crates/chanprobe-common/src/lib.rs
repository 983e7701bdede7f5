//! ---
//! probe_section: "03-configuration"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Shared configuration and logging primitives."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
//! Shared primitives for the chanprobe workspace.
//! This crate exposes scenario configuration loading and the tracing
//! bootstrap consumed by the probe binary and integration tests.

pub mod config;
pub mod logging;

pub use config::{
    ChannelsConfig, GatewayConfig, LoadedProbeConfig, LoggingConfig, PayloadShape, ProbeConfig,
    RangeRuleConfig, RulesConfig, ScenarioConfig, Separator, SufficiencyConfig,
    TimestampRuleConfig,
};
pub use logging::{init_tracing, LogFormat};
