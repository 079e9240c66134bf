// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Validation Errors and Limits
//!
//! The error taxonomy returned by the event validator and the tunable
//! business-rule bounds. Validation always aggregates: callers receive
//! every violation found, never a truncated list.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("field {field} has invalid type, expected {expected}")]
    InvalidType { field: String, expected: String },

    #[error("field {field} must be a non-empty string")]
    EmptyField { field: String },

    /// The per-kind registry is closed; anything outside it is rejected.
    #[error("unrecognized event kind: {kind}")]
    UnknownKind { kind: String },

    #[error("field {field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Events describing the future are invalid wherever the timestamp sits.
    #[error("field {field} is a timestamp in the future")]
    FutureTimestamp { field: String },

    #[error("meta.consent_id is required when meta.phi is true")]
    MissingConsentId,

    #[error("meta.consent_id is not a valid UUID: {value}")]
    MalformedConsentId { value: String },

    #[error("field {field} has invalid value: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Business-rule bounds applied by the per-kind rules.
///
/// Defaults encode clinical plausibility: sessions over four hours,
/// scores outside 0–100, or joint angles outside 0–180° are rejected
/// even when well-typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationLimits {
    pub max_session_duration_secs: f64,
    pub max_form_score: f64,
    pub max_joint_angle_degrees: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_session_duration_secs: 14_400.0,
            max_form_score: 100.0,
            max_joint_angle_degrees: 180.0,
        }
    }
}
