// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Key Manager
//!
//! Sole owner of symmetric key material and key status transitions. The
//! whole key table lives behind one `RwLock`, so rotation is a single
//! atomic swap: no caller ever observes zero active keys or two of them.
//! Rotation demotes the previous key to `Archived` instead of deleting
//! it, so ciphertext sealed under an archived key keeps decrypting.
//!
//! Backups export the table encrypted under an Argon2id-derived key; key
//! material never leaves this module in plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::audit::{AuditAction, AuditRecord};
use crate::domain::key::{EncryptionKey, KeyError, KeyId, KeyInfo, KeyStatus, KEY_SIZE};
use crate::infrastructure::audit_trail::AuditTrail;

const BACKUP_SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

// Argon2id cost parameters for the backup passphrase KDF.
const ARGON2_MEMORY_KIB: u32 = 47_104;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 1;

struct KeyEntry {
    material: EncryptionKey,
    status: KeyStatus,
    created_at: DateTime<Utc>,
}

struct KeyTable {
    active: KeyId,
    keys: HashMap<KeyId, KeyEntry>,
}

pub struct KeyManager {
    table: RwLock<KeyTable>,
    audit: Option<Arc<AuditTrail>>,
}

impl KeyManager {
    /// Starts with one freshly generated active key.
    pub fn new() -> Self {
        let key_id = KeyId::new();
        let mut keys = HashMap::new();
        keys.insert(
            key_id,
            KeyEntry {
                material: generate_key(),
                status: KeyStatus::Active,
                created_at: Utc::now(),
            },
        );
        Self {
            table: RwLock::new(KeyTable { active: key_id, keys }),
            audit: None,
        }
    }

    /// Attach an audit trail; rotate/archive/backup/restore will record to it.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn active_key_id(&self) -> KeyId {
        self.table.read().active
    }

    /// The key all new encryptions must use.
    pub fn active_key(&self) -> (KeyId, EncryptionKey) {
        let table = self.table.read();
        let entry = table
            .keys
            .get(&table.active)
            .expect("key table always contains the active key");
        (table.active, entry.material.clone())
    }

    /// Resolve a key for decryption. Active and archived keys alike.
    pub fn get_key(&self, key_id: KeyId) -> Result<EncryptionKey, KeyError> {
        self.table
            .read()
            .keys
            .get(&key_id)
            .map(|entry| entry.material.clone())
            .ok_or(KeyError::KeyNotFound(key_id))
    }

    /// Generate a new key, mark it active, and demote the previous active
    /// key to archived, all under one write lock, so the swap is atomic
    /// with respect to [`Self::active_key_id`].
    pub fn rotate_key(&self) -> KeyId {
        let new_id = KeyId::new();
        let new_entry = KeyEntry {
            material: generate_key(),
            status: KeyStatus::Active,
            created_at: Utc::now(),
        };

        {
            let mut table = self.table.write();
            let previous = table.active;
            if let Some(entry) = table.keys.get_mut(&previous) {
                entry.status = KeyStatus::Archived;
            }
            table.keys.insert(new_id, new_entry);
            table.active = new_id;
        }

        self.audit(AuditRecord::new(AuditAction::Rotate).with_key(new_id));
        new_id
    }

    /// Archive a non-active key. Archival is reversible only via restore;
    /// it never deletes material, so existing ciphertext stays readable.
    pub fn archive_key(&self, key_id: KeyId) -> Result<(), KeyError> {
        {
            let mut table = self.table.write();
            if table.active == key_id {
                return Err(KeyError::ActiveKeyProtected(key_id));
            }
            let entry = table.keys.get_mut(&key_id).ok_or(KeyError::KeyNotFound(key_id))?;
            entry.status = KeyStatus::Archived;
        }
        self.audit(AuditRecord::new(AuditAction::Archive).with_key(key_id));
        Ok(())
    }

    pub fn key_info(&self, key_id: KeyId) -> Result<KeyInfo, KeyError> {
        self.table
            .read()
            .keys
            .get(&key_id)
            .map(|entry| KeyInfo {
                key_id,
                status: entry.status,
                created_at: entry.created_at,
                fingerprint: entry.material.fingerprint(),
            })
            .ok_or(KeyError::KeyNotFound(key_id))
    }

    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.table
            .read()
            .keys
            .iter()
            .map(|(key_id, entry)| KeyInfo {
                key_id: *key_id,
                status: entry.status,
                created_at: entry.created_at,
                fingerprint: entry.material.fingerprint(),
            })
            .collect()
    }

    /// Export every key encrypted under `passphrase`.
    ///
    /// Blob layout: `salt(16) || nonce(12) || ciphertext+tag`. The
    /// plaintext is the JSON key table; it only ever exists transiently
    /// inside this call.
    pub fn backup_keys(&self, passphrase: &str) -> Result<Vec<u8>, KeyError> {
        let backup = {
            let table = self.table.read();
            KeyBackup {
                active: table.active,
                entries: table
                    .keys
                    .iter()
                    .map(|(key_id, entry)| BackupEntry {
                        key_id: *key_id,
                        status: entry.status,
                        created_at: entry.created_at,
                        material: STANDARD.encode(entry.material.as_bytes()),
                    })
                    .collect(),
            }
        };

        let plaintext =
            serde_json::to_vec(&backup).map_err(|e| KeyError::BackupFailed(e.to_string()))?;

        let mut salt = [0u8; BACKUP_SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let kek = derive_backup_key(passphrase, &salt)
            .map_err(|e| KeyError::BackupFailed(e))?;
        let cipher = Aes256Gcm::new_from_slice(&kek)
            .map_err(|e| KeyError::BackupFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| KeyError::BackupFailed("encryption failure".to_string()))?;

        let mut blob = Vec::with_capacity(BACKUP_SALT_SIZE + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        self.audit(AuditRecord::new(AuditAction::Backup));
        Ok(blob)
    }

    /// Import keys from a backup blob. Wrong passphrase or a tampered
    /// blob fails closed. Restored keys land as `Archived`: the current
    /// active key is never demoted by a restore; rotation is the only
    /// active-key transition. Returns the number of keys added.
    pub fn restore_from_backup(&self, blob: &[u8], passphrase: &str) -> Result<usize, KeyError> {
        if blob.len() < BACKUP_SALT_SIZE + NONCE_SIZE {
            return Err(KeyError::RestoreFailed("blob too short".to_string()));
        }
        let (salt, rest) = blob.split_at(BACKUP_SALT_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        let kek = derive_backup_key(passphrase, salt)
            .map_err(|e| KeyError::RestoreFailed(e))?;
        let cipher = Aes256Gcm::new_from_slice(&kek)
            .map_err(|e| KeyError::RestoreFailed(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| KeyError::RestoreFailed("authentication failure".to_string()))?;

        let backup: KeyBackup =
            serde_json::from_slice(&plaintext).map_err(|e| KeyError::RestoreFailed(e.to_string()))?;

        let mut restored = 0;
        {
            let mut table = self.table.write();
            for entry in backup.entries {
                if table.keys.contains_key(&entry.key_id) {
                    continue;
                }
                let raw = STANDARD
                    .decode(&entry.material)
                    .map_err(|e| KeyError::RestoreFailed(e.to_string()))?;
                let raw: [u8; KEY_SIZE] = raw
                    .try_into()
                    .map_err(|_| KeyError::RestoreFailed("bad key length".to_string()))?;
                table.keys.insert(
                    entry.key_id,
                    KeyEntry {
                        material: EncryptionKey::from_bytes(raw),
                        status: KeyStatus::Archived,
                        created_at: entry.created_at,
                    },
                );
                restored += 1;
            }
        }

        self.audit(AuditRecord::new(AuditAction::Restore));
        Ok(restored)
    }

    fn audit(&self, record: AuditRecord) {
        if let Some(audit) = &self.audit {
            audit.record(record);
        }
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct KeyBackup {
    active: KeyId,
    entries: Vec<BackupEntry>,
}

#[derive(Serialize, Deserialize)]
struct BackupEntry {
    key_id: KeyId,
    status: KeyStatus,
    created_at: DateTime<Utc>,
    /// Base64 key material; only ever serialized inside the encrypted blob.
    material: String,
}

fn generate_key() -> EncryptionKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    EncryptionKey::from_bytes(bytes)
}

fn derive_backup_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE], String> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(KEY_SIZE))
        .map_err(|e| format!("invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| format!("key derivation failed: {e}"))?;
    Ok(key)
}
