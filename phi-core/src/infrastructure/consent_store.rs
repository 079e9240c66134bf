// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consent Store
//!
//! Sole owner of consent status transitions. Backed by a `DashMap`, so a
//! revocation mutates its entry under the shard lock; once `revoke`
//! returns, no subsequent `is_active` call for that id observes true.
//!
//! Expiry is never a stored transition: `is_active` derives it from
//! `expires_at` on every call.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::consent::{Consent, ConsentError, ConsentId, ConsentStatus, ConsentType};

#[derive(Debug, Default)]
pub struct ConsentStore {
    consents: DashMap<ConsentId, Consent>,
}

impl ConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an immediately granted consent with no expiry.
    pub fn grant(
        &self,
        patient_id: &str,
        consent_type: ConsentType,
        details: HashMap<String, Value>,
    ) -> ConsentId {
        self.insert(patient_id, consent_type, details, ConsentStatus::Granted, None)
    }

    /// Record an immediately granted consent that lapses at `expires_at`.
    pub fn grant_with_expiry(
        &self,
        patient_id: &str,
        consent_type: ConsentType,
        details: HashMap<String, Value>,
        expires_at: DateTime<Utc>,
    ) -> ConsentId {
        self.insert(
            patient_id,
            consent_type,
            details,
            ConsentStatus::Granted,
            Some(expires_at),
        )
    }

    /// Record a consent awaiting approval (e.g. guardian countersign).
    pub fn create_pending(
        &self,
        patient_id: &str,
        consent_type: ConsentType,
        details: HashMap<String, Value>,
    ) -> ConsentId {
        self.insert(patient_id, consent_type, details, ConsentStatus::Pending, None)
    }

    /// Transition `pending → granted`. Approving an already granted
    /// consent is a no-op success; a revoked consent is immutable.
    pub fn approve(&self, consent_id: ConsentId) -> Result<(), ConsentError> {
        let mut entry = self
            .consents
            .get_mut(&consent_id)
            .ok_or(ConsentError::NotFound(consent_id))?;
        match entry.status {
            ConsentStatus::Pending => {
                entry.status = ConsentStatus::Granted;
                entry.granted_at = Some(Utc::now());
                Ok(())
            }
            ConsentStatus::Granted => Ok(()),
            ConsentStatus::Revoked => Err(ConsentError::AlreadyRevoked(consent_id)),
            other => Err(ConsentError::InvalidTransition(
                consent_id,
                other,
                ConsentStatus::Pending,
            )),
        }
    }

    /// Revoke a consent. Idempotent: revoking an already revoked consent
    /// is a no-op success, not an error.
    pub fn revoke(&self, consent_id: ConsentId, reason: Option<&str>) -> Result<(), ConsentError> {
        let mut entry = self
            .consents
            .get_mut(&consent_id)
            .ok_or(ConsentError::NotFound(consent_id))?;
        if entry.status == ConsentStatus::Revoked {
            return Ok(());
        }
        entry.status = ConsentStatus::Revoked;
        entry.revoked_at = Some(Utc::now());
        entry.revocation_reason = reason.map(|r| r.to_string());
        Ok(())
    }

    /// True iff the consent exists, is granted, and has not expired.
    pub fn is_active(&self, consent_id: ConsentId) -> bool {
        self.consents
            .get(&consent_id)
            .map(|consent| consent.value().is_active(Utc::now()))
            .unwrap_or(false)
    }

    pub fn get(&self, consent_id: ConsentId) -> Result<Consent, ConsentError> {
        self.consents
            .get(&consent_id)
            .map(|consent| consent.value().clone())
            .ok_or(ConsentError::NotFound(consent_id))
    }

    /// All consents currently authorizing PHI processing for a patient.
    pub fn active_consents_for(&self, patient_id: &str) -> Vec<Consent> {
        let now = Utc::now();
        self.consents
            .iter()
            .filter(|entry| entry.patient_id == patient_id && entry.is_active(now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.consents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consents.is_empty()
    }

    fn insert(
        &self,
        patient_id: &str,
        consent_type: ConsentType,
        details: HashMap<String, Value>,
        status: ConsentStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> ConsentId {
        let consent_id = ConsentId::new();
        let granted_at = match status {
            ConsentStatus::Granted => Some(Utc::now()),
            _ => None,
        };
        self.consents.insert(
            consent_id,
            Consent {
                consent_id,
                patient_id: patient_id.to_string(),
                consent_type,
                status,
                granted_at,
                expires_at,
                revoked_at: None,
                revocation_reason: None,
                consent_details: details,
            },
        );
        consent_id
    }
}
