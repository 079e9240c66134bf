// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Patient Consent
//!
//! Consent records and their lifecycle: `pending → granted → {revoked |
//! expired}`. `expired` is a read-time fact derived from `expires_at`:
//! there is no background transition job, and `is_active` must reflect
//! expiry on every call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsentId(pub Uuid);

impl ConsentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ConsentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scope of permission a consent authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    DataCollection,
    Sharing,
    Research,
    Marketing,
    VideoRecording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Granted,
    Revoked,
    Expired,
}

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("consent not found: {0}")]
    NotFound(ConsentId),

    /// Revoked consents are immutable; a re-grant needs a new consent id.
    #[error("consent {0} is revoked and cannot transition")]
    AlreadyRevoked(ConsentId),

    #[error("invalid consent transition: {0} is {1:?}, expected {2:?}")]
    InvalidTransition(ConsentId, ConsentStatus, ConsentStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub consent_id: ConsentId,
    pub patient_id: String,
    pub consent_type: ConsentType,
    pub status: ConsentStatus,
    pub granted_at: Option<DateTime<Utc>>,

    /// `None` means the consent never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,

    /// Scope-specific permission map (e.g. which data classes may be shared).
    #[serde(default)]
    pub consent_details: HashMap<String, Value>,
}

impl Consent {
    /// Status with expiry applied at read time. A stored `Granted` past its
    /// `expires_at` reads as `Expired`; nothing is mutated.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ConsentStatus {
        match self.status {
            ConsentStatus::Granted => match self.expires_at {
                Some(expires_at) if expires_at <= now => ConsentStatus::Expired,
                _ => ConsentStatus::Granted,
            },
            other => other,
        }
    }

    /// True iff PHI processing is authorized right now.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ConsentStatus::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn granted(expires_at: Option<DateTime<Utc>>) -> Consent {
        Consent {
            consent_id: ConsentId::new(),
            patient_id: "p1".to_string(),
            consent_type: ConsentType::DataCollection,
            status: ConsentStatus::Granted,
            granted_at: Some(Utc::now()),
            expires_at,
            revoked_at: None,
            revocation_reason: None,
            consent_details: HashMap::new(),
        }
    }

    #[test]
    fn test_granted_without_expiry_is_active() {
        let consent = granted(None);
        assert!(consent.is_active(Utc::now()));
        assert_eq!(consent.effective_status(Utc::now()), ConsentStatus::Granted);
    }

    #[test]
    fn test_expiry_is_derived_at_read_time() {
        let consent = granted(Some(Utc::now() + Duration::hours(1)));
        let now = Utc::now();
        assert!(consent.is_active(now));

        // Same record, read after the deadline: expired without any
        // transition having been triggered.
        let later = now + Duration::hours(2);
        assert!(!consent.is_active(later));
        assert_eq!(consent.effective_status(later), ConsentStatus::Expired);
        assert_eq!(consent.status, ConsentStatus::Granted);
    }

    #[test]
    fn test_pending_and_revoked_are_never_active() {
        let mut consent = granted(None);
        consent.status = ConsentStatus::Pending;
        assert!(!consent.is_active(Utc::now()));

        consent.status = ConsentStatus::Revoked;
        assert!(!consent.is_active(Utc::now()));
    }

    #[test]
    fn test_consent_type_serializes_snake_case() {
        let json = serde_json::to_string(&ConsentType::VideoRecording).unwrap();
        assert_eq!(json, "\"video_recording\"");
        let json = serde_json::to_string(&ConsentStatus::Granted).unwrap();
        assert_eq!(json, "\"granted\"");
    }
}
