//! ---
//! probe_section: "02-gateway-client"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Gateway client transports."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
//! Wire-level gateway clients for the chanprobe harness.
//!
//! The engine only consumes [`chanprobe_core::GatewayEvent`]s; this crate
//! produces them, either from a live WebSocket connection ([`WsGateway`]) or
//! from a scripted in-memory queue ([`ScriptedGateway`]).

pub mod script;
pub mod ws;

pub use script::ScriptedGateway;
pub use ws::WsGateway;
