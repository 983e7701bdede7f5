//! ---
//! probe_section: "01-validation-engine"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Collection and validation engine for conformance runs."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use chrono::DateTime;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use thiserror::Error;

use chanprobe_common::config::{PayloadShape, ScenarioConfig};

/// Inclusive range membership over IEEE doubles.
pub fn in_range(value: f64, lower: f64, upper: f64) -> bool {
    value >= lower && value <= upper
}

/// Whether `value` parses as a calendar timestamp (RFC 3339 or RFC 2822).
pub fn parseable_timestamp(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok() || DateTime::parse_from_rfc2822(value).is_ok()
}

/// Role a payload plays in a run; mandatoriness and structural rules differ
/// per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRole {
    /// Initial payload delivered by the subscribe proxy on a data channel.
    Snapshot,
    /// Streamed message; absent fields are skipped, not flagged.
    Publication,
    /// Initial payload on a no-data channel; must be an empty object.
    NoDataSnapshot,
}

/// Validator applied to a single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Numeric range, inclusive at both bounds.
    Range { lower: f64, upper: f64 },
    /// String that must parse as a calendar timestamp.
    Timestamp,
}

/// One field's rule plus its snapshot mandatoriness.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub rule: FieldRule,
    pub mandatory_in_snapshot: bool,
}

/// Why a payload failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error("value {value} out of [{lower}, {upper}]")]
    OutOfRange { value: f64, lower: f64, upper: f64 },
    #[error("value {value} is not numeric")]
    NotNumeric { value: JsonValue },
    #[error("unparseable timestamp {value}")]
    UnparseableTimestamp { value: JsonValue },
    #[error("mandatory field missing")]
    MissingMandatory,
    #[error("expected an empty object, found keys [{keys}]")]
    NonEmptyNoData { keys: String },
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// First rule violation found in a payload, with enough context for the
/// run's diagnostic message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{context}: `{field}` {reason}")]
pub struct ValidationFailure {
    /// Dotted field path, or `payload` for structural failures.
    pub field: String,
    /// Label of the payload's origin, e.g. "subscribe proxy" or "publication".
    pub context: String,
    pub reason: FailureReason,
}

impl ValidationFailure {
    /// Structural failures break the channel contract rather than a value
    /// rule; the caller reports them as protocol violations.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.reason,
            FailureReason::MissingMandatory
                | FailureReason::NonEmptyNoData { .. }
                | FailureReason::NotAnObject
        )
    }
}

/// Resolve a dotted path inside a payload.
///
/// Presence is explicit: the key chain must exist and the value must be
/// non-null. A present numeric zero is present.
pub fn lookup<'a>(payload: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Configuration-driven rule set: per-field validator, per-role
/// mandatoriness, payload shape baked into the field paths.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    fields: IndexMap<String, FieldSpec>,
}

impl RuleSet {
    /// Build the rule set for a scenario, resolving field paths against the
    /// declared payload shape.
    pub fn from_scenario(scenario: &ScenarioConfig) -> Self {
        let (integer_path, float_path) = match scenario.shape {
            PayloadShape::Flat => ("integer".to_owned(), "float".to_owned()),
            PayloadShape::Nested => ("val.integer".to_owned(), "val.float".to_owned()),
        };

        let mut fields = IndexMap::new();
        fields.insert(
            integer_path,
            FieldSpec {
                rule: FieldRule::Range {
                    lower: scenario.rules.integer.lower,
                    upper: scenario.rules.integer.upper,
                },
                mandatory_in_snapshot: scenario.rules.integer.mandatory_in_snapshot,
            },
        );
        fields.insert(
            float_path,
            FieldSpec {
                rule: FieldRule::Range {
                    lower: scenario.rules.float.lower,
                    upper: scenario.rules.float.upper,
                },
                mandatory_in_snapshot: scenario.rules.float.mandatory_in_snapshot,
            },
        );
        for name in &scenario.rules.timestamps.fields {
            fields.insert(
                format!("ts.{name}"),
                FieldSpec {
                    rule: FieldRule::Timestamp,
                    mandatory_in_snapshot: scenario.rules.timestamps.mandatory_in_snapshot,
                },
            );
        }

        Self { fields }
    }

    /// Dotted paths of every field the rule set knows about, in declaration
    /// order; this is also the tracked-field list for coverage sufficiency.
    pub fn tracked_fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Validate one payload for the given role. The first violation wins.
    pub fn validate(
        &self,
        payload: &JsonValue,
        role: PayloadRole,
        context: &str,
    ) -> Result<(), ValidationFailure> {
        let Some(object) = payload.as_object() else {
            return Err(ValidationFailure {
                field: "payload".to_owned(),
                context: context.to_owned(),
                reason: FailureReason::NotAnObject,
            });
        };

        if role == PayloadRole::NoDataSnapshot {
            if !object.is_empty() {
                let keys = object.keys().cloned().collect::<Vec<_>>().join(", ");
                return Err(ValidationFailure {
                    field: "payload".to_owned(),
                    context: context.to_owned(),
                    reason: FailureReason::NonEmptyNoData { keys },
                });
            }
            return Ok(());
        }

        for (path, spec) in &self.fields {
            match lookup(payload, path) {
                Some(value) => {
                    if let Err(reason) = check_field(&spec.rule, value) {
                        return Err(ValidationFailure {
                            field: path.clone(),
                            context: context.to_owned(),
                            reason,
                        });
                    }
                }
                None => {
                    if role == PayloadRole::Snapshot && spec.mandatory_in_snapshot {
                        return Err(ValidationFailure {
                            field: path.clone(),
                            context: context.to_owned(),
                            reason: FailureReason::MissingMandatory,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn check_field(rule: &FieldRule, value: &JsonValue) -> Result<(), FailureReason> {
    match rule {
        FieldRule::Range { lower, upper } => {
            let Some(number) = value.as_f64() else {
                return Err(FailureReason::NotNumeric {
                    value: value.clone(),
                });
            };
            if !in_range(number, *lower, *upper) {
                return Err(FailureReason::OutOfRange {
                    value: number,
                    lower: *lower,
                    upper: *upper,
                });
            }
            Ok(())
        }
        FieldRule::Timestamp => {
            let parseable = value.as_str().is_some_and(parseable_timestamp);
            if !parseable {
                return Err(FailureReason::UnparseableTimestamp {
                    value: value.clone(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanprobe_common::config::{RangeRuleConfig, SufficiencyConfig};
    use serde_json::json;

    fn scenario(shape: PayloadShape) -> ScenarioConfig {
        ScenarioConfig {
            shape,
            ..ScenarioConfig::default()
        }
    }

    fn nested_rules() -> RuleSet {
        RuleSet::from_scenario(&scenario(PayloadShape::Nested))
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(in_range(150.0, 150.0, 160.0));
        assert!(in_range(160.0, 150.0, 160.0));
        assert!(!in_range(150.0 - f64::EPSILON * 256.0, 150.0, 160.0));
        assert!(!in_range(160.0 + f64::EPSILON * 256.0, 150.0, 160.0));
    }

    #[test]
    fn timestamps_parse_rfc3339_and_rfc2822() {
        assert!(parseable_timestamp("2024-05-17T08:00:00Z"));
        assert!(parseable_timestamp("2024-05-17T08:00:00.123+02:00"));
        assert!(parseable_timestamp("Fri, 17 May 2024 08:00:00 +0000"));
        assert!(!parseable_timestamp("not a date"));
        assert!(!parseable_timestamp(""));
    }

    #[test]
    fn lookup_treats_null_as_absent_but_zero_as_present() {
        let payload = json!({"val": {"integer": 0, "float": null}});
        assert!(lookup(&payload, "val.integer").is_some());
        assert!(lookup(&payload, "val.float").is_none());
        assert!(lookup(&payload, "ts.first").is_none());
    }

    #[test]
    fn valid_nested_snapshot_passes() {
        let rules = nested_rules();
        let payload = json!({
            "val": {"integer": 155, "float": 33.2},
            "ts": {"first": "2024-05-17T08:00:00Z", "second": "2024-05-17T08:00:01Z"}
        });
        assert!(rules
            .validate(&payload, PayloadRole::Snapshot, "subscribe proxy")
            .is_ok());
    }

    #[test]
    fn flat_shape_resolves_top_level_numeric_fields() {
        let rules = RuleSet::from_scenario(&scenario(PayloadShape::Flat));
        let payload = json!({
            "integer": 150,
            "float": 35.0,
            "ts": {"first": "2024-05-17T08:00:00Z", "second": "2024-05-17T08:00:01Z"}
        });
        assert!(rules
            .validate(&payload, PayloadRole::Snapshot, "subscribe proxy")
            .is_ok());
        assert_eq!(
            rules.tracked_fields(),
            vec!["integer", "float", "ts.first", "ts.second"]
        );
    }

    #[test]
    fn snapshot_missing_mandatory_field_is_structural() {
        let rules = nested_rules();
        let payload = json!({
            "val": {"integer": 155},
            "ts": {"first": "2024-05-17T08:00:00Z", "second": "2024-05-17T08:00:01Z"}
        });
        let failure = rules
            .validate(&payload, PayloadRole::Snapshot, "subscribe proxy")
            .unwrap_err();
        assert_eq!(failure.field, "val.float");
        assert_eq!(failure.reason, FailureReason::MissingMandatory);
        assert!(failure.is_structural());
    }

    #[test]
    fn publication_with_absent_fields_is_skipped_not_flagged() {
        let rules = nested_rules();
        let payload = json!({"val": {"integer": 152}});
        assert!(rules
            .validate(&payload, PayloadRole::Publication, "publication")
            .is_ok());
        // Even a payload with none of the tracked fields is legal in-stream.
        assert!(rules
            .validate(&json!({}), PayloadRole::Publication, "publication")
            .is_ok());
    }

    #[test]
    fn out_of_range_value_reports_field_value_and_context() {
        let mut config = scenario(PayloadShape::Nested);
        config.rules.integer = RangeRuleConfig {
            lower: 150.0,
            upper: 250.0,
            mandatory_in_snapshot: true,
        };
        let rules = RuleSet::from_scenario(&config);

        let failure = rules
            .validate(
                &json!({"val": {"integer": 260, "float": 34.0}}),
                PayloadRole::Publication,
                "publication",
            )
            .unwrap_err();
        assert_eq!(failure.field, "val.integer");
        assert!(!failure.is_structural());
        assert_eq!(
            failure.to_string(),
            "publication: `val.integer` value 260 out of [150, 250]"
        );
    }

    #[test]
    fn present_zero_is_validated_not_skipped() {
        let rules = nested_rules();
        let failure = rules
            .validate(
                &json!({"val": {"integer": 0}}),
                PayloadRole::Publication,
                "publication",
            )
            .unwrap_err();
        assert_eq!(
            failure.reason,
            FailureReason::OutOfRange {
                value: 0.0,
                lower: 150.0,
                upper: 160.0
            }
        );
    }

    #[test]
    fn non_numeric_and_unparseable_values_fail() {
        let rules = nested_rules();
        let failure = rules
            .validate(
                &json!({"val": {"integer": "155"}}),
                PayloadRole::Publication,
                "publication",
            )
            .unwrap_err();
        assert!(matches!(failure.reason, FailureReason::NotNumeric { .. }));

        let failure = rules
            .validate(
                &json!({"ts": {"first": 12345}}),
                PayloadRole::Publication,
                "publication",
            )
            .unwrap_err();
        assert!(matches!(
            failure.reason,
            FailureReason::UnparseableTimestamp { .. }
        ));
    }

    #[test]
    fn nodata_snapshot_must_be_empty_object() {
        let rules = nested_rules();
        assert!(rules
            .validate(&json!({}), PayloadRole::NoDataSnapshot, "subscribe proxy")
            .is_ok());

        let failure = rules
            .validate(
                &json!({"val": {"integer": 155}}),
                PayloadRole::NoDataSnapshot,
                "subscribe proxy",
            )
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::NonEmptyNoData { keys: "val".to_owned() });
        assert!(failure.is_structural());

        let failure = rules
            .validate(&json!([]), PayloadRole::NoDataSnapshot, "subscribe proxy")
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::NotAnObject);
    }

    #[test]
    fn coverage_fields_follow_timestamp_configuration() {
        let mut config = scenario(PayloadShape::Nested);
        config.rules.timestamps.fields = vec!["first".to_owned()];
        config.sufficiency = SufficiencyConfig::Coverage { minimum: 3 };
        let rules = RuleSet::from_scenario(&config);
        assert_eq!(
            rules.tracked_fields(),
            vec!["val.integer", "val.float", "ts.first"]
        );
    }
}
