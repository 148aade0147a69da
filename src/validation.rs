//! Field-level validation error accumulators (§4.2 sibling / module D).
//!
//! Grounded on the teacher's `ConfigError` variants (`types/error.rs`) for
//! the error shape, generalized from "one error, return immediately" into
//! an accumulator so config and input validation can report every problem
//! in one pass rather than one-at-a-time — the pattern the teacher's own
//! `jsonschema`-backed validation (present in `Cargo.toml` as a direct
//! dependency) follows, since `jsonschema::validate` likewise yields an
//! iterator of all violations rather than stopping at the first.

use crate::error::ValidationError;

/// Accumulates field-level errors across one validation pass.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, condition: bool, field: &str, reason: &str) -> &mut Self {
        if !condition {
            self.errors.push(ValidationError::Field {
                field: field.to_string(),
                reason: reason.to_string(),
            });
        }
        self
    }

    pub fn require_in_unit_range(&mut self, field: &str, value: f64) -> &mut Self {
        self.require(
            (0.0..=1.0).contains(&value),
            field,
            &format!("must be within [0,1], got {value}"),
        )
    }

    pub fn require_non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        self.require(!value.is_empty(), field, "must not be empty")
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Converts the accumulated errors into a `Result`, collapsing to
    /// `ValidationError::Multiple(n)` when there is more than one -- the
    /// first error is preserved standalone since it is usually the most
    /// actionable for a caller surfacing a single message.
    pub fn finish(self) -> Result<(), ValidationError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.into_iter().next().unwrap()),
            n => Err(ValidationError::Multiple(n)),
        }
    }
}

/// Validates a replay event payload against a JSON Schema, used at the
/// backfill projection boundary (§4.11/M) for externally-sourced event
/// shapes before they become `ReplayTimelineRecord`s.
pub fn validate_against_schema(
    schema: &serde_json::Value,
    instance: &serde_json::Value,
) -> Result<(), ValidationError> {
    let compiled = jsonschema::validator_for(schema).map_err(|e| ValidationError::Field {
        field: "schema".to_string(),
        reason: e.to_string(),
    })?;
    let errors: Vec<ValidationError> = compiled
        .iter_errors(instance)
        .map(|e| ValidationError::Field {
            field: e.instance_path.to_string(),
            reason: e.to_string(),
        })
        .collect();
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.into_iter().next().unwrap()),
        n => Err(ValidationError::Multiple(n)),
    }
}
