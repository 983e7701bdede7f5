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

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::rules::ValidationFailure;

/// Fatal conditions that short-circuit a conformance run.
///
/// There is no retry logic anywhere in the engine: every variant aborts the
/// run after teardown and becomes the failure reason of the verdict.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The gateway broke the declared channel contract, e.g. a publication
    /// on a no-data channel or a snapshot missing mandatory fields.
    #[error("protocol violation on `{channel}`: {detail}")]
    ProtocolViolation { channel: String, detail: String },

    /// A payload field value failed its scenario rule.
    #[error("validation failure: {0}")]
    Validation(#[from] ValidationFailure),

    /// The sufficiency predicate never became true within the bound.
    #[error("timed out after {}ms waiting for sufficient publications", .0.as_millis())]
    Timeout(Duration),

    /// The connection could not be used or dropped unexpectedly.
    #[error("transport failure: {0}")]
    Transport(#[from] GatewayError),
}
