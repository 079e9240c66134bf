// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Event Validator
//!
//! Validates raw event envelopes against structural rules, a closed
//! per-kind field registry, and cross-field business rules (numeric
//! ranges, temporal sanity). Validation never stops at the first
//! violation; the caller always receives the complete list.
//!
//! No event reaches the encryptor without passing through here: success
//! yields the typed [`Event`] the rest of the pipeline operates on.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::domain::event::Event;
use crate::domain::validation::{ValidationError, ValidationLimits};

const SEVERITY_LITERALS: &[&str] = &["low", "medium", "high", "critical"];

static UUID_RE: OnceLock<Regex> = OnceLock::new();

fn uuid_re() -> &'static Regex {
    UUID_RE.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .expect("uuid pattern is valid")
    })
}

/// Per-kind rule: collects violations against an already type-checked body.
type KindRule = fn(&Map<String, Value>, &ValidationLimits, &mut Vec<ValidationError>);

/// Closed registry. Extending the schema set means adding an entry here,
/// not branching at call sites; unknown kinds are rejected outright.
const KIND_RULES: &[(&str, KindRule)] = &[
    ("exercise_session", rule_exercise_session),
    ("rep_observation", rule_rep_observation),
    ("feedback", rule_feedback),
    ("alert", rule_alert),
    ("consent", rule_consent),
];

pub struct EventValidator {
    limits: ValidationLimits,
}

impl EventValidator {
    pub fn new() -> Self {
        Self {
            limits: ValidationLimits::default(),
        }
    }

    pub fn with_limits(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn known_kinds() -> Vec<&'static str> {
        KIND_RULES.iter().map(|(kind, _)| *kind).collect()
    }

    /// Validate a raw envelope. Returns the typed event on success, or
    /// every violation found on failure.
    pub fn validate(&self, raw: &Value) -> Result<Event, Vec<ValidationError>> {
        let Some(envelope) = raw.as_object() else {
            return Err(vec![ValidationError::InvalidType {
                field: "event".to_string(),
                expected: "object".to_string(),
            }]);
        };

        let mut errors = Vec::new();
        let now = Utc::now();

        let kind = require_nonempty_string(envelope, "kind", &mut errors);
        require_nonempty_string(envelope, "subject_id", &mut errors);
        let body = require_object(envelope, "body", &mut errors);
        let meta = require_object(envelope, "meta", &mut errors);

        let phi = match meta.and_then(|m| m.get("phi")) {
            Some(Value::Bool(flag)) => Some(*flag),
            Some(_) => {
                errors.push(ValidationError::InvalidType {
                    field: "meta.phi".to_string(),
                    expected: "boolean".to_string(),
                });
                None
            }
            None => {
                if meta.is_some() {
                    errors.push(ValidationError::MissingField {
                        field: "meta.phi".to_string(),
                    });
                }
                None
            }
        };

        // PHI events must reference a consent in UUID textual format.
        // Absence and malformation are distinct errors, and both are
        // distinct from a missing phi flag.
        if phi == Some(true) {
            match meta.and_then(|m| m.get("consent_id")) {
                None => errors.push(ValidationError::MissingConsentId),
                Some(Value::String(value)) if !uuid_re().is_match(value) => {
                    errors.push(ValidationError::MalformedConsentId {
                        value: value.clone(),
                    })
                }
                Some(Value::String(_)) => {}
                Some(other) => errors.push(ValidationError::MalformedConsentId {
                    value: other.to_string(),
                }),
            }
        }

        if let (Some(kind), Some(body)) = (kind, body) {
            match KIND_RULES.iter().find(|(name, _)| *name == kind) {
                Some((_, rule)) => rule(body, &self.limits, &mut errors),
                None => errors.push(ValidationError::UnknownKind {
                    kind: kind.to_string(),
                }),
            }
        }

        // Temporal sanity applies wherever a timestamp sits in the body,
        // including nested maps.
        if let Some(body) = body {
            scan_timestamps(body, "body", now, &mut errors);
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        serde_json::from_value(raw.clone()).map_err(|e| {
            vec![ValidationError::InvalidValue {
                field: "event".to_string(),
                reason: e.to_string(),
            }]
        })
    }
}

impl Default for EventValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Structural helpers ────────────────────────────────────────────────────────

fn require_nonempty_string<'a>(
    envelope: &'a Map<String, Value>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<&'a str> {
    match envelope.get(field) {
        None => {
            errors.push(ValidationError::MissingField {
                field: field.to_string(),
            });
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(ValidationError::EmptyField {
                field: field.to_string(),
            });
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            errors.push(ValidationError::InvalidType {
                field: field.to_string(),
                expected: "string".to_string(),
            });
            None
        }
    }
}

fn require_object<'a>(
    envelope: &'a Map<String, Value>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<&'a Map<String, Value>> {
    match envelope.get(field) {
        None => {
            errors.push(ValidationError::MissingField {
                field: field.to_string(),
            });
            None
        }
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            errors.push(ValidationError::InvalidType {
                field: field.to_string(),
                expected: "object".to_string(),
            });
            None
        }
    }
}

fn require_body_field(body: &Map<String, Value>, field: &str, errors: &mut Vec<ValidationError>) {
    if !body.contains_key(field) {
        errors.push(ValidationError::MissingField {
            field: format!("body.{field}"),
        });
    }
}

fn check_number_range(
    body: &Map<String, Value>,
    field: &str,
    min: f64,
    max: f64,
    errors: &mut Vec<ValidationError>,
) {
    let Some(value) = body.get(field) else {
        return;
    };
    match value.as_f64() {
        Some(n) if n < min || n > max => errors.push(ValidationError::OutOfRange {
            field: format!("body.{field}"),
            value: n,
            min,
            max,
        }),
        Some(_) => {}
        None => errors.push(ValidationError::InvalidType {
            field: format!("body.{field}"),
            expected: "number".to_string(),
        }),
    }
}

// ── Per-kind rules ────────────────────────────────────────────────────────────

fn rule_exercise_session(
    body: &Map<String, Value>,
    limits: &ValidationLimits,
    errors: &mut Vec<ValidationError>,
) {
    require_body_field(body, "exercise_id", errors);
    // Sessions beyond four hours are implausible, not merely unusual.
    check_number_range(
        body,
        "session_duration",
        0.0,
        limits.max_session_duration_secs,
        errors,
    );
}

fn rule_rep_observation(
    body: &Map<String, Value>,
    limits: &ValidationLimits,
    errors: &mut Vec<ValidationError>,
) {
    require_body_field(body, "exercise_id", errors);

    match body.get("rep_number") {
        None => errors.push(ValidationError::MissingField {
            field: "body.rep_number".to_string(),
        }),
        Some(value) => match value.as_i64() {
            Some(n) if n < 1 => errors.push(ValidationError::InvalidValue {
                field: "body.rep_number".to_string(),
                reason: format!("must be an integer >= 1, got {n}"),
            }),
            Some(_) => {}
            None => errors.push(ValidationError::InvalidType {
                field: "body.rep_number".to_string(),
                expected: "integer".to_string(),
            }),
        },
    }

    check_number_range(body, "form_score", 0.0, limits.max_form_score, errors);

    if let Some(angles) = body.get("joint_angles") {
        match angles {
            Value::Object(map) => {
                for (joint, angle) in map {
                    check_angle(joint, angle, limits, errors);
                }
            }
            Value::Array(values) => {
                for (index, angle) in values.iter().enumerate() {
                    check_angle(&index.to_string(), angle, limits, errors);
                }
            }
            _ => errors.push(ValidationError::InvalidType {
                field: "body.joint_angles".to_string(),
                expected: "object or array".to_string(),
            }),
        }
    }
}

fn check_angle(
    joint: &str,
    angle: &Value,
    limits: &ValidationLimits,
    errors: &mut Vec<ValidationError>,
) {
    let field = format!("body.joint_angles.{joint}");
    match angle.as_f64() {
        Some(n) if n < 0.0 || n > limits.max_joint_angle_degrees => {
            errors.push(ValidationError::OutOfRange {
                field,
                value: n,
                min: 0.0,
                max: limits.max_joint_angle_degrees,
            })
        }
        Some(_) => {}
        None => errors.push(ValidationError::InvalidType {
            field,
            expected: "number".to_string(),
        }),
    }
}

fn rule_feedback(body: &Map<String, Value>, _: &ValidationLimits, errors: &mut Vec<ValidationError>) {
    require_body_field(body, "feedback_type", errors);
}

fn rule_alert(body: &Map<String, Value>, _: &ValidationLimits, errors: &mut Vec<ValidationError>) {
    require_body_field(body, "alert_type", errors);

    match body.get("severity") {
        None => errors.push(ValidationError::MissingField {
            field: "body.severity".to_string(),
        }),
        Some(Value::String(level)) if SEVERITY_LITERALS.contains(&level.as_str()) => {}
        Some(Value::String(level)) => errors.push(ValidationError::InvalidValue {
            field: "body.severity".to_string(),
            reason: format!("\"{level}\" is not one of low, medium, high, critical"),
        }),
        Some(_) => errors.push(ValidationError::InvalidType {
            field: "body.severity".to_string(),
            expected: "string".to_string(),
        }),
    }
}

fn rule_consent(body: &Map<String, Value>, _: &ValidationLimits, errors: &mut Vec<ValidationError>) {
    match body.get("granted") {
        None => errors.push(ValidationError::MissingField {
            field: "body.granted".to_string(),
        }),
        Some(Value::Bool(_)) => {}
        Some(_) => errors.push(ValidationError::InvalidType {
            field: "body.granted".to_string(),
            expected: "boolean".to_string(),
        }),
    }
}

// ── Business rules ────────────────────────────────────────────────────────────

/// Walk the body and reject any `timestamp` key strictly after `now`,
/// at any nesting depth. RFC 3339 strings and unix-epoch numbers both
/// count as timestamps.
fn scan_timestamps(
    map: &Map<String, Value>,
    prefix: &str,
    now: DateTime<Utc>,
    errors: &mut Vec<ValidationError>,
) {
    for (key, value) in map {
        let path = format!("{prefix}.{key}");
        if key == "timestamp" {
            match value {
                Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                    Ok(ts) if ts.with_timezone(&Utc) > now => {
                        errors.push(ValidationError::FutureTimestamp { field: path.clone() })
                    }
                    Ok(_) => {}
                    Err(_) => errors.push(ValidationError::InvalidValue {
                        field: path.clone(),
                        reason: "not an RFC 3339 timestamp".to_string(),
                    }),
                },
                Value::Number(_) => {
                    if let Some(epoch) = value.as_f64() {
                        if epoch > now.timestamp() as f64 {
                            errors.push(ValidationError::FutureTimestamp { field: path.clone() });
                        }
                    }
                }
                _ => errors.push(ValidationError::InvalidType {
                    field: path.clone(),
                    expected: "timestamp".to_string(),
                }),
            }
        }
        if let Value::Object(nested) = value {
            scan_timestamps(nested, &path, now, errors);
        }
    }
}
