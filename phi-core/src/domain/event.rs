// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Clinical Event Envelope
//!
//! The `{kind, subject_id, body, meta}` structure that every domain event
//! travels in. `body` is an open key-value map whose required keys depend
//! on `kind`; `meta` carries the PHI flag, the consent reference, and the
//! encryption bookkeeping attached by the encryptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::key::KeyId;

/// Body key holding the sealed envelope when the whole body is PHI.
pub const ENCRYPTED_DATA_KEY: &str = "encrypted_data";

/// Body key holding the sealed envelope for mixed events, where only the
/// fields listed in `meta.phi_fields` are PHI.
pub const ENCRYPTED_PHI_DATA_KEY: &str = "encrypted_phi_data";

/// A validated clinical event.
///
/// Instances are produced by the validator; hand-constructed events in
/// tests must uphold the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Schema/business-rule selector (e.g. `exercise_session`).
    pub kind: String,

    /// The patient/person this event concerns. Never empty.
    pub subject_id: String,

    /// Open key-value payload. Required keys depend on `kind`.
    pub body: HashMap<String, Value>,

    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Whether this event carries protected health information.
    pub phi: bool,

    /// Producer schema version.
    #[serde(default)]
    pub version: String,

    /// Consent reference; required whenever `phi` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<String>,

    /// Body keys that are PHI. Absent means the whole body is PHI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phi_fields: Option<Vec<String>>,

    /// Retention window; the encryptor turns this into `expires_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<i64>,

    /// Set by the encryptor: whether the stored body is sealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,

    /// Key that sealed this event; resolvable via the key manager.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key_id: Option<String>,

    /// Purge deadline derived from `retention_days`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EventMeta {
    /// Plain non-PHI meta for the given schema version.
    pub fn non_phi(version: &str) -> Self {
        Self {
            phi: false,
            version: version.to_string(),
            consent_id: None,
            phi_fields: None,
            retention_days: None,
            encrypted: None,
            encryption_key_id: None,
            expires_at: None,
        }
    }

    /// PHI meta referencing a consent. `phi_fields` of `None` marks the
    /// whole body as PHI.
    pub fn phi(version: &str, consent_id: &str, phi_fields: Option<Vec<String>>) -> Self {
        Self {
            phi: true,
            version: version.to_string(),
            consent_id: Some(consent_id.to_string()),
            phi_fields,
            retention_days: None,
            encrypted: None,
            encryption_key_id: None,
            expires_at: None,
        }
    }
}

impl Event {
    pub fn new(kind: &str, subject_id: &str, body: HashMap<String, Value>, meta: EventMeta) -> Self {
        Self {
            kind: kind.to_string(),
            subject_id: subject_id.to_string(),
            body,
            meta,
        }
    }

    /// True when the body holds a sealed envelope (whole-body or mixed).
    pub fn is_sealed(&self) -> bool {
        self.body.contains_key(ENCRYPTED_DATA_KEY) || self.body.contains_key(ENCRYPTED_PHI_DATA_KEY)
    }
}

/// Output of one authenticated encryption call.
///
/// `nonce` is unique per call; `tag` is the GCM authentication tag kept
/// separate from the ciphertext so tampering with either fails closed on
/// decrypt. All three are base64-encoded for JSON transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,

    /// Key the payload was sealed under; archived keys stay resolvable.
    pub key_id: KeyId,
}
