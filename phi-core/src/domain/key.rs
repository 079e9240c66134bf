// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Encryption Keys
//!
//! AES-256 key material and its metadata. Exactly one key is `Active` at
//! any time; all others are `Archived` but remain resolvable so historical
//! ciphertext keeps decrypting. Archival is never deletion.
//!
//! # Memory Security
//!
//! `EncryptionKey` implements `ZeroizeOnDrop` so raw material is erased
//! when dropped, and its `Debug` impl exposes only a SHA-256 fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(pub Uuid);

impl KeyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for KeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Archived,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("encryption key not found: {0}")]
    KeyNotFound(KeyId),

    /// Archiving the active key would leave no key for new encryptions;
    /// rotate first.
    #[error("key {0} is active and cannot be archived directly")]
    ActiveKeyProtected(KeyId),

    #[error("key backup failed: {0}")]
    BackupFailed(String),

    #[error("key restore failed: {0}")]
    RestoreFailed(String),
}

/// Raw 32-byte symmetric key material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// SHA-256 fingerprint (first 8 bytes, hex). Identifies the key
    /// without leaking material.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

// Intentionally NOT deriving Debug: key bytes must never reach logs.
impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Key metadata safe to expose to callers and audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: KeyId,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
}
