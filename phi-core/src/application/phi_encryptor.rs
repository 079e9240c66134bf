// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PHI Encryptor
//!
//! Seals PHI-flagged event bodies with AES-256-GCM after confirming an
//! active consent, and performs the inverse for readers. Holds no state
//! of its own: it reads from the key manager and consent store, writes
//! to the audit trail, and constructs transient envelopes, so parallel
//! callers need no locking and nonce generation stays collision-free.
//!
//! Consent is checked before any ciphertext is produced. An event
//! rejected here is returned untouched by construction: the body is only
//! replaced after the seal succeeds.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::audit::{AuditAction, AuditRecord};
use crate::domain::consent::ConsentId;
use crate::domain::event::{
    EncryptedEnvelope, Event, ENCRYPTED_DATA_KEY, ENCRYPTED_PHI_DATA_KEY,
};
use crate::domain::key::{EncryptionKey, KeyError, KeyId};
use crate::infrastructure::audit_trail::AuditTrail;
use crate::infrastructure::consent_store::ConsentStore;
use crate::infrastructure::key_manager::KeyManager;

/// GCM nonce length, fixed across all keys.
const NONCE_SIZE: usize = 12;

/// GCM authentication tag length, fixed across all keys.
const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum PhiError {
    /// PHI event without a resolvable, currently active consent. The
    /// event must not be persisted in any form when this is returned.
    #[error("no active consent resolvable for this phi event")]
    MissingConsent,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tampered or corrupted ciphertext/tag, or a wrong key. Always
    /// fails closed: no partial plaintext is ever returned.
    #[error("decryption failed: ciphertext rejected")]
    DecryptionFailed,

    #[error("encryption key not found: {0}")]
    KeyNotFound(KeyId),

    #[error("malformed event: {0}")]
    InvalidEvent(String),
}

impl From<KeyError> for PhiError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::KeyNotFound(key_id) => PhiError::KeyNotFound(key_id),
            other => PhiError::EncryptionFailed(other.to_string()),
        }
    }
}

pub struct PhiEncryptor {
    keys: Arc<KeyManager>,
    consents: Arc<ConsentStore>,
    audit: Arc<AuditTrail>,
}

impl PhiEncryptor {
    pub fn new(keys: Arc<KeyManager>, consents: Arc<ConsentStore>, audit: Arc<AuditTrail>) -> Self {
        Self {
            keys,
            consents,
            audit,
        }
    }

    /// Seal a plaintext map under the currently active key with a fresh
    /// random nonce.
    pub fn encrypt(&self, plaintext: &HashMap<String, Value>) -> Result<EncryptedEnvelope, PhiError> {
        let (key_id, key) = self.keys.active_key();
        seal(plaintext, key_id, &key)
    }

    /// Seal under a specific key, for re-encryption of historical data.
    pub fn encrypt_with_key(
        &self,
        plaintext: &HashMap<String, Value>,
        key_id: KeyId,
    ) -> Result<EncryptedEnvelope, PhiError> {
        let key = self.keys.get_key(key_id)?;
        seal(plaintext, key_id, &key)
    }

    /// Open an envelope. `KeyNotFound` if the key id no longer resolves;
    /// `DecryptionFailed` on any tampering.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<HashMap<String, Value>, PhiError> {
        let key = self.keys.get_key(envelope.key_id)?;
        open(envelope, &key)
    }

    /// Run a validated event through the PHI gate.
    ///
    /// Non-PHI events pass through unchanged apart from
    /// `meta.encrypted = false`. PHI events require an active consent;
    /// the whole body (or only `meta.phi_fields`) is then sealed, the
    /// key id recorded in meta, and `retention_days` turned into an
    /// `expires_at` deadline.
    pub fn process_event(&self, mut event: Event) -> Result<Event, PhiError> {
        if !event.meta.phi {
            event.meta.encrypted = Some(false);
            return Ok(event);
        }

        let consent_id = resolve_consent_id(&event)?;
        if !self.consents.is_active(consent_id) {
            return Err(PhiError::MissingConsent);
        }

        let (key_id, key) = self.keys.active_key();

        match event.meta.phi_fields.clone() {
            Some(fields) => {
                // Seal first, strip after: a failed seal leaves the event
                // untransformed.
                let mut phi_map = HashMap::new();
                for field in &fields {
                    if let Some(value) = event.body.get(field) {
                        phi_map.insert(field.clone(), value.clone());
                    }
                }
                let envelope = seal(&phi_map, key_id, &key)?;
                for field in &fields {
                    event.body.remove(field);
                }
                event.body.insert(
                    ENCRYPTED_PHI_DATA_KEY.to_string(),
                    serde_json::to_value(envelope)
                        .map_err(|e| PhiError::EncryptionFailed(e.to_string()))?,
                );
            }
            None => {
                let envelope = seal(&event.body, key_id, &key)?;
                let mut body = HashMap::new();
                body.insert(
                    ENCRYPTED_DATA_KEY.to_string(),
                    serde_json::to_value(envelope)
                        .map_err(|e| PhiError::EncryptionFailed(e.to_string()))?,
                );
                event.body = body;
            }
        }

        event.meta.encrypted = Some(true);
        event.meta.encryption_key_id = Some(key_id.to_string());
        if let Some(days) = event.meta.retention_days {
            event.meta.expires_at = Some(Utc::now() + Duration::days(days));
        }

        self.audit.record(
            AuditRecord::new(AuditAction::Encrypt)
                .with_key(key_id)
                .with_consent(consent_id)
                .with_subject(&event.subject_id),
        );
        Ok(event)
    }

    /// Inverse of [`Self::process_event`]: restores original field names
    /// and values exactly. Events that were never sealed pass through
    /// unchanged.
    pub fn decrypt_event(&self, mut event: Event) -> Result<Event, PhiError> {
        let key_id = if let Some(raw) = event.body.remove(ENCRYPTED_DATA_KEY) {
            let envelope = parse_envelope(raw)?;
            event.body = self.decrypt(&envelope)?;
            envelope.key_id
        } else if let Some(raw) = event.body.remove(ENCRYPTED_PHI_DATA_KEY) {
            let envelope = parse_envelope(raw)?;
            let restored = self.decrypt(&envelope)?;
            event.body.extend(restored);
            envelope.key_id
        } else {
            return Ok(event);
        };

        event.meta.encrypted = Some(false);
        event.meta.encryption_key_id = None;

        self.audit.record(
            AuditRecord::new(AuditAction::Decrypt)
                .with_key(key_id)
                .with_subject(&event.subject_id),
        );
        Ok(event)
    }

    /// Retention predicate for the external purge sweep: true when the
    /// event's `expires_at` deadline has passed.
    pub fn should_purge(&self, event: &Event, now: DateTime<Utc>) -> bool {
        event.meta.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

fn resolve_consent_id(event: &Event) -> Result<ConsentId, PhiError> {
    let raw = event
        .meta
        .consent_id
        .as_deref()
        .ok_or(PhiError::MissingConsent)?;
    ConsentId::from_string(raw).map_err(|_| PhiError::MissingConsent)
}

fn parse_envelope(raw: Value) -> Result<EncryptedEnvelope, PhiError> {
    serde_json::from_value(raw).map_err(|e| PhiError::InvalidEvent(e.to_string()))
}

fn seal(
    plaintext: &HashMap<String, Value>,
    key_id: KeyId,
    key: &EncryptionKey,
) -> Result<EncryptedEnvelope, PhiError> {
    let bytes =
        serde_json::to_vec(plaintext).map_err(|e| PhiError::EncryptionFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| PhiError::EncryptionFailed(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), bytes.as_ref())
        .map_err(|_| PhiError::EncryptionFailed("aead failure".to_string()))?;

    // GCM appends the tag; the envelope carries it separately.
    let split = sealed.len() - TAG_SIZE;
    Ok(EncryptedEnvelope {
        ciphertext: STANDARD.encode(&sealed[..split]),
        nonce: STANDARD.encode(nonce_bytes),
        tag: STANDARD.encode(&sealed[split..]),
        key_id,
    })
}

fn open(
    envelope: &EncryptedEnvelope,
    key: &EncryptionKey,
) -> Result<HashMap<String, Value>, PhiError> {
    let ciphertext = STANDARD
        .decode(&envelope.ciphertext)
        .map_err(|_| PhiError::DecryptionFailed)?;
    let nonce_bytes = STANDARD
        .decode(&envelope.nonce)
        .map_err(|_| PhiError::DecryptionFailed)?;
    let tag = STANDARD
        .decode(&envelope.tag)
        .map_err(|_| PhiError::DecryptionFailed)?;

    if nonce_bytes.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(PhiError::DecryptionFailed);
    }

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| PhiError::DecryptionFailed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_ref())
        .map_err(|_| PhiError::DecryptionFailed)?;

    serde_json::from_slice(&plaintext).map_err(|_| PhiError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::consent::ConsentType;
    use crate::domain::event::EventMeta;
    use serde_json::json;
    use std::collections::HashSet;

    struct Fixture {
        keys: Arc<KeyManager>,
        consents: Arc<ConsentStore>,
        audit: Arc<AuditTrail>,
        encryptor: PhiEncryptor,
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(AuditTrail::new());
        let keys = Arc::new(KeyManager::new().with_audit(audit.clone()));
        let consents = Arc::new(ConsentStore::new());
        let encryptor = PhiEncryptor::new(keys.clone(), consents.clone(), audit.clone());
        Fixture {
            keys,
            consents,
            audit,
            encryptor,
        }
    }

    fn plaintext_map() -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("full_name".to_string(), json!("Ada Lovelace"));
        map.insert("phone_number".to_string(), json!("+44 20 7946 0000"));
        map
    }

    fn phi_event(fx: &Fixture, phi_fields: Option<Vec<String>>) -> Event {
        let consent_id = fx
            .consents
            .grant("p1", ConsentType::DataCollection, HashMap::new());
        let mut body = HashMap::new();
        body.insert("exercise_preferences".to_string(), json!("morning"));
        body.insert("full_name".to_string(), json!("Ada Lovelace"));
        body.insert("phone_number".to_string(), json!("+44 20 7946 0000"));
        Event::new(
            "feedback",
            "p1",
            body,
            EventMeta::phi("1.0", &consent_id.to_string(), phi_fields),
        )
    }

    // ── Round-trip & nonce behavior ───────────────────────────────────────────

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let fx = fixture();
        let plaintext = plaintext_map();
        let envelope = fx.encryptor.encrypt(&plaintext).unwrap();
        assert_eq!(envelope.key_id, fx.keys.active_key_id());

        let decrypted = fx.encryptor.decrypt(&envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_nonces_never_repeat_across_calls() {
        let fx = fixture();
        let plaintext = plaintext_map();

        let mut nonces = HashSet::new();
        let mut ciphertexts = HashSet::new();
        for _ in 0..100 {
            let envelope = fx.encryptor.encrypt(&plaintext).unwrap();
            assert!(nonces.insert(envelope.nonce.clone()), "nonce collision");
            assert!(
                ciphertexts.insert(envelope.ciphertext.clone()),
                "ciphertext collision for identical plaintext"
            );
        }
    }

    // ── Tamper detection ──────────────────────────────────────────────────────

    #[test]
    fn test_flipped_ciphertext_byte_fails_closed() {
        let fx = fixture();
        let mut envelope = fx.encryptor.encrypt(&plaintext_map()).unwrap();

        let mut raw = STANDARD.decode(&envelope.ciphertext).unwrap();
        raw[0] ^= 0x01;
        envelope.ciphertext = STANDARD.encode(&raw);

        assert!(matches!(
            fx.encryptor.decrypt(&envelope),
            Err(PhiError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_flipped_tag_byte_fails_closed() {
        let fx = fixture();
        let mut envelope = fx.encryptor.encrypt(&plaintext_map()).unwrap();

        let mut raw = STANDARD.decode(&envelope.tag).unwrap();
        raw[TAG_SIZE - 1] ^= 0x80;
        envelope.tag = STANDARD.encode(&raw);

        assert!(matches!(
            fx.encryptor.decrypt(&envelope),
            Err(PhiError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_prefixed_ciphertext_fails_closed() {
        let fx = fixture();
        let mut envelope = fx.encryptor.encrypt(&plaintext_map()).unwrap();

        let mut raw = STANDARD.decode(&envelope.ciphertext).unwrap();
        raw.insert(0, 0xFF);
        envelope.ciphertext = STANDARD.encode(&raw);

        assert!(matches!(
            fx.encryptor.decrypt(&envelope),
            Err(PhiError::DecryptionFailed)
        ));
    }

    // ── Key isolation & rotation ──────────────────────────────────────────────

    #[test]
    fn test_substituted_key_id_never_succeeds() {
        let fx = fixture();
        let mut envelope = fx.encryptor.encrypt(&plaintext_map()).unwrap();

        // A real but wrong key: authentication must reject it.
        let other = fx.keys.rotate_key();
        envelope.key_id = other;
        assert!(matches!(
            fx.encryptor.decrypt(&envelope),
            Err(PhiError::DecryptionFailed)
        ));

        // An unknown key id is a distinct failure.
        envelope.key_id = KeyId::new();
        assert!(matches!(
            fx.encryptor.decrypt(&envelope),
            Err(PhiError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_rotation_does_not_break_existing_ciphertext() {
        let fx = fixture();
        let plaintext = plaintext_map();
        let envelope = fx.encryptor.encrypt(&plaintext).unwrap();

        let new_id = fx.keys.rotate_key();
        assert_ne!(envelope.key_id, new_id);
        assert_eq!(fx.keys.active_key_id(), new_id);

        // Old data still opens; new data uses the new key.
        assert_eq!(fx.encryptor.decrypt(&envelope).unwrap(), plaintext);
        let fresh = fx.encryptor.encrypt(&plaintext).unwrap();
        assert_eq!(fresh.key_id, new_id);
    }

    #[test]
    fn test_encrypt_with_archived_key_for_reencryption() {
        let fx = fixture();
        let old_id = fx.keys.active_key_id();
        fx.keys.rotate_key();

        let envelope = fx
            .encryptor
            .encrypt_with_key(&plaintext_map(), old_id)
            .unwrap();
        assert_eq!(envelope.key_id, old_id);
        assert_eq!(fx.encryptor.decrypt(&envelope).unwrap(), plaintext_map());
    }

    // ── Consent gating ────────────────────────────────────────────────────────

    #[test]
    fn test_non_phi_event_passes_through_unencrypted() {
        let fx = fixture();
        let mut body = HashMap::new();
        body.insert("exercise_id".to_string(), json!("squat"));
        body.insert("reps_completed".to_string(), json!(10));
        let event = Event::new("exercise_session", "p1", body.clone(), EventMeta::non_phi("1.0"));

        let processed = fx.encryptor.process_event(event).unwrap();
        assert_eq!(processed.meta.encrypted, Some(false));
        assert_eq!(processed.body, body);
        assert!(fx.audit.is_empty());
    }

    #[test]
    fn test_phi_event_without_consent_id_rejected() {
        let fx = fixture();
        let mut event = phi_event(&fx, None);
        event.meta.consent_id = None;

        assert!(matches!(
            fx.encryptor.process_event(event),
            Err(PhiError::MissingConsent)
        ));
    }

    #[test]
    fn test_phi_event_with_revoked_consent_rejected() {
        let fx = fixture();
        let event = phi_event(&fx, None);
        let consent_id =
            ConsentId::from_string(event.meta.consent_id.as_deref().unwrap()).unwrap();
        fx.consents.revoke(consent_id, Some("withdrawn")).unwrap();

        assert!(matches!(
            fx.encryptor.process_event(event),
            Err(PhiError::MissingConsent)
        ));
        // Nothing was encrypted, nothing audited.
        assert!(fx.audit.records_for_action(AuditAction::Encrypt).is_empty());
    }

    #[test]
    fn test_phi_event_with_expired_consent_rejected() {
        let fx = fixture();
        let consent_id = fx.consents.grant_with_expiry(
            "p1",
            ConsentType::DataCollection,
            HashMap::new(),
            Utc::now() - Duration::minutes(1),
        );
        let mut body = HashMap::new();
        body.insert("note".to_string(), json!("confidential"));
        let event = Event::new(
            "feedback",
            "p1",
            body,
            EventMeta::phi("1.0", &consent_id.to_string(), None),
        );

        assert!(matches!(
            fx.encryptor.process_event(event),
            Err(PhiError::MissingConsent)
        ));
    }

    // ── Whole-body and mixed encryption ───────────────────────────────────────

    #[test]
    fn test_whole_body_sealed_and_restored() {
        let fx = fixture();
        let event = phi_event(&fx, None);
        let original_body = event.body.clone();

        let processed = fx.encryptor.process_event(event).unwrap();
        assert_eq!(processed.meta.encrypted, Some(true));
        assert!(processed.body.contains_key(ENCRYPTED_DATA_KEY));
        assert_eq!(processed.body.len(), 1);
        assert_eq!(
            processed.meta.encryption_key_id,
            Some(fx.keys.active_key_id().to_string())
        );

        let restored = fx.encryptor.decrypt_event(processed).unwrap();
        assert_eq!(restored.body, original_body);
        assert_eq!(restored.meta.encrypted, Some(false));
        assert!(restored.meta.encryption_key_id.is_none());
    }

    #[test]
    fn test_mixed_event_keeps_non_phi_fields_plaintext() {
        let fx = fixture();
        let event = phi_event(
            &fx,
            Some(vec!["full_name".to_string(), "phone_number".to_string()]),
        );

        let processed = fx.encryptor.process_event(event).unwrap();
        assert_eq!(
            processed.body.get("exercise_preferences"),
            Some(&json!("morning"))
        );
        assert!(!processed.body.contains_key("full_name"));
        assert!(!processed.body.contains_key("phone_number"));
        assert!(processed.body.contains_key(ENCRYPTED_PHI_DATA_KEY));

        let restored = fx.encryptor.decrypt_event(processed).unwrap();
        assert_eq!(restored.body.get("full_name"), Some(&json!("Ada Lovelace")));
        assert_eq!(
            restored.body.get("phone_number"),
            Some(&json!("+44 20 7946 0000"))
        );
        assert_eq!(
            restored.body.get("exercise_preferences"),
            Some(&json!("morning"))
        );
    }

    #[test]
    fn test_decrypt_event_without_envelope_is_identity() {
        let fx = fixture();
        let mut body = HashMap::new();
        body.insert("exercise_id".to_string(), json!("squat"));
        let event = Event::new("exercise_session", "p1", body, EventMeta::non_phi("1.0"));

        let back = fx.encryptor.decrypt_event(event.clone()).unwrap();
        assert_eq!(back, event);
    }

    // ── Retention ─────────────────────────────────────────────────────────────

    #[test]
    fn test_retention_days_sets_expiry_and_purge_predicate() {
        let fx = fixture();
        let mut event = phi_event(&fx, None);
        event.meta.retention_days = Some(30);

        let processed = fx.encryptor.process_event(event).unwrap();
        let expires_at = processed.meta.expires_at.unwrap();
        let expected = Utc::now() + Duration::days(30);
        assert!((expires_at - expected).num_seconds().abs() < 5);

        assert!(!fx.encryptor.should_purge(&processed, Utc::now()));
        assert!(fx
            .encryptor
            .should_purge(&processed, Utc::now() + Duration::days(31)));
    }

    #[test]
    fn test_should_purge_false_without_expiry() {
        let fx = fixture();
        let event = Event::new(
            "feedback",
            "p1",
            HashMap::new(),
            EventMeta::non_phi("1.0"),
        );
        assert!(!fx.encryptor.should_purge(&event, Utc::now()));
    }

    // ── Audit wiring ──────────────────────────────────────────────────────────

    #[test]
    fn test_encrypt_and_decrypt_are_audited() {
        let fx = fixture();
        let event = phi_event(&fx, None);
        let subject = event.subject_id.clone();

        let processed = fx.encryptor.process_event(event).unwrap();
        fx.encryptor.decrypt_event(processed).unwrap();

        let encrypts = fx.audit.records_for_action(AuditAction::Encrypt);
        let decrypts = fx.audit.records_for_action(AuditAction::Decrypt);
        assert_eq!(encrypts.len(), 1);
        assert_eq!(decrypts.len(), 1);
        assert_eq!(encrypts[0].subject_id.as_deref(), Some(subject.as_str()));
        assert!(encrypts[0].consent_id.is_some());
        assert_eq!(encrypts[0].key_id, decrypts[0].key_id);
    }

    // ── Throughput guard ──────────────────────────────────────────────────────

    #[test]
    fn test_sustained_event_throughput() {
        let fx = fixture();
        let event = phi_event(&fx, None);

        let started = std::time::Instant::now();
        let count = 500;
        for _ in 0..count {
            fx.encryptor.process_event(event.clone()).unwrap();
        }
        let elapsed = started.elapsed();

        // Regression guard, not an SLA: several hundred events/second
        // means 500 small events must finish well inside two seconds.
        assert!(
            elapsed < std::time::Duration::from_secs(2),
            "500 events took {elapsed:?}"
        );
    }
}
