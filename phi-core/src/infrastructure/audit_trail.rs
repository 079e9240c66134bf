// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Trail
//!
//! Append-only record of key lifecycle actions and encrypt/decrypt
//! operations. Records are kept in memory and simultaneously emitted as
//! structured tracing events so any subscriber (stdout JSON, Loki, etc.)
//! captures them. There is deliberately no mutation or removal API.

use parking_lot::Mutex;
use tracing::info;

use crate::domain::audit::{AuditAction, AuditRecord};

#[derive(Debug, Default)]
pub struct AuditTrail {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Also emits it at `INFO` in structured form.
    pub fn record(&self, record: AuditRecord) {
        info!(
            action = ?record.action,
            key_id = record.key_id.map(|k| k.to_string()),
            consent_id = record.consent_id.map(|c| c.to_string()),
            subject_id = record.subject_id.as_deref(),
            "phi audit record"
        );
        self.records.lock().push(record);
    }

    /// Snapshot of all records in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn records_for_action(&self, action: AuditAction) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
