// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Records
//!
//! Value types for the append-only audit trail. Every key lifecycle
//! action and every encrypt/decrypt operation produces one record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::consent::ConsentId;
use crate::domain::key::KeyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Encrypt,
    Decrypt,
    Rotate,
    Archive,
    Backup,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<KeyId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            key_id: None,
            consent_id: None,
            subject_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_key(mut self, key_id: KeyId) -> Self {
        self.key_id = Some(key_id);
        self
    }

    pub fn with_consent(mut self, consent_id: ConsentId) -> Self {
        self.consent_id = Some(consent_id);
        self
    }

    pub fn with_subject(mut self, subject_id: &str) -> Self {
        self.subject_id = Some(subject_id.to_string());
        self
    }
}
