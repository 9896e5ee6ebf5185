/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Durable RSA signing key lifecycle.
//!
//! [`KeyStore`] owns the only copy of private key material. Keys live in a
//! single manifest file (`keys.json`) under a restricted data directory, and
//! each key also gets a public-only audit record in `public-keys/<keyId>.json`
//! for external auditors.
//!
//! Keys are never deleted, only deactivated, so historical signatures stay
//! verifiable. Every write rewrites the whole manifest; one writing process
//! per data directory is assumed.

use super::audit;
use super::storage::{PlatformSecureStorage, SecureStorage};
use crate::crypto::{
    decode_private_key_pem, decode_public_key_pem, derive_key_id, generate_signing_keypair,
    sign_payload, verify_payload, SigningError, KEY_ALGORITHM,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File name of the key manifest inside the data directory.
pub const KEY_MANIFEST_FILE: &str = "keys.json";

/// Directory holding public-only audit records.
pub const PUBLIC_KEY_DIR: &str = "public-keys";

/// Errors that can occur while mutating the key store.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key manifest serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key generation failed: {0}")]
    Crypto(#[from] SigningError),
}

/// A stored signing key, including private material.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    pub key_id: String,
    /// PKCS#8 PEM private key
    pub private_key: String,
    /// SPKI PEM public key
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
    pub active: bool,
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("algorithm", &self.algorithm)
            .field("active", &self.active)
            .finish()
    }
}

/// Public metadata about a stored key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

/// Public-only audit record written next to the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRecord {
    pub key_id: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
}

/// A payload signature produced by the active key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSignature {
    /// Base64 RSA-SHA256 signature
    pub signature: String,
    pub key_id: String,
}

/// Looks up public keys by key id for verification.
pub trait PublicKeyResolver {
    /// Returns the SPKI PEM public key for `key_id`, active or not.
    fn resolve_public_key(&self, key_id: &str) -> Option<String>;
}

impl PublicKeyResolver for HashMap<String, String> {
    fn resolve_public_key(&self, key_id: &str) -> Option<String> {
        self.get(key_id).cloned()
    }
}

impl PublicKeyResolver for BTreeMap<String, String> {
    fn resolve_public_key(&self, key_id: &str) -> Option<String> {
        self.get(key_id).cloned()
    }
}

/// File-backed signing key store.
pub struct KeyStore {
    data_dir: PathBuf,
    storage: Arc<dyn SecureStorage>,
    keys: RwLock<Vec<StoredKey>>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("data_dir", &self.data_dir)
            .field("keys", &self.keys.read().len())
            .finish()
    }
}

impl KeyStore {
    /// Open the key store rooted at `data_dir` using platform storage.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_storage(data_dir, Arc::new(PlatformSecureStorage))
    }

    /// Open the key store with an explicit storage provider.
    ///
    /// An unreadable or corrupt manifest is logged and treated as empty; the
    /// next [`initialize`](Self::initialize) bootstraps a fresh key.
    pub fn with_storage(data_dir: impl Into<PathBuf>, storage: Arc<dyn SecureStorage>) -> Self {
        let data_dir = data_dir.into();
        let keys = load_manifest(&data_dir.join(KEY_MANIFEST_FILE));
        Self {
            data_dir,
            storage,
            keys: RwLock::new(keys),
        }
    }

    /// Root directory of this store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the key manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(KEY_MANIFEST_FILE)
    }

    /// Path of the public audit record for `key_id`.
    pub fn public_record_path(&self, key_id: &str) -> PathBuf {
        self.data_dir
            .join(PUBLIC_KEY_DIR)
            .join(format!("{key_id}.json"))
    }

    /// Return the active key, generating one if none exists.
    ///
    /// Idempotent: repeated calls return the same key until a rotation.
    pub fn initialize(&self) -> Result<StoredKey, KeyStoreError> {
        let mut keys = self.keys.write();
        if let Some(active) = keys.iter().find(|k| k.active) {
            return Ok(active.clone());
        }

        let key = generate_stored_key()?;
        let mut next = keys.clone();
        next.push(key.clone());
        self.persist(&next)?;
        self.write_public_record(&key)?;
        *keys = next;

        audit::log_key_created(&key.key_id, &key.algorithm);
        tracing::info!(key_id = %key.key_id, data_dir = %self.data_dir.display(), "Key store initialized");
        Ok(key)
    }

    /// The key currently used for new signatures.
    pub fn get_active_key(&self) -> Option<StoredKey> {
        self.keys.read().iter().find(|k| k.active).cloned()
    }

    /// Look up any key, active or historical.
    pub fn get_key(&self, key_id: &str) -> Option<StoredKey> {
        self.keys.read().iter().find(|k| k.key_id == key_id).cloned()
    }

    /// Deactivate every stored key and make a freshly generated key active.
    pub fn rotate_key(&self) -> Result<StoredKey, KeyStoreError> {
        let mut keys = self.keys.write();

        let deactivated: Vec<String> = keys
            .iter()
            .filter(|k| k.active)
            .map(|k| k.key_id.clone())
            .collect();

        let key = generate_stored_key()?;
        let mut next: Vec<StoredKey> = keys
            .iter()
            .cloned()
            .map(|mut k| {
                k.active = false;
                k
            })
            .collect();
        next.push(key.clone());

        self.persist(&next)?;
        self.write_public_record(&key)?;
        *keys = next;

        audit::log_key_created(&key.key_id, &key.algorithm);
        audit::log_key_rotated(&deactivated, &key.key_id);
        Ok(key)
    }

    /// Public metadata for every stored key, oldest first.
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.keys
            .read()
            .iter()
            .map(|k| KeyInfo {
                key_id: k.key_id.clone(),
                created_at: k.created_at,
                active: k.active,
            })
            .collect()
    }

    /// Sign `payload` with the active key.
    ///
    /// Returns `None` when there is no active key or the stored key cannot be
    /// used. Callers must treat `None` as a hard failure.
    pub fn sign_payload(&self, payload: &str) -> Option<PayloadSignature> {
        let active = self.get_active_key()?;

        let signature = decode_private_key_pem(&active.private_key)
            .and_then(|private_key| sign_payload(payload.as_bytes(), &private_key));

        match signature {
            Ok(signature) => Some(PayloadSignature {
                signature,
                key_id: active.key_id,
            }),
            Err(e) => {
                tracing::error!(key_id = %active.key_id, error = %e, "Active key could not sign payload");
                None
            }
        }
    }

    /// Verify `signature` over `payload` with the key named `key_id`.
    ///
    /// Never fails: unknown keys and malformed input verify as `false`.
    pub fn verify_signature(&self, payload: &str, signature: &str, key_id: &str) -> bool {
        let Some(key) = self.get_key(key_id) else {
            tracing::debug!(key_id = %key_id, "Verification requested for unknown key");
            return false;
        };

        let result = decode_public_key_pem(&key.public_key)
            .and_then(|public_key| verify_payload(payload.as_bytes(), signature, &public_key));

        match result {
            Ok(()) => true,
            Err(SigningError::VerificationFailed) => false,
            Err(e) => {
                tracing::debug!(key_id = %key_id, error = %e, "Signature could not be checked");
                false
            }
        }
    }

    /// Public PEM for `key_id`, for distribution to auditors.
    pub fn export_public_key(&self, key_id: &str) -> Option<String> {
        let key = self.get_key(key_id)?;
        audit::log_key_exported(key_id);
        Some(key.public_key)
    }

    /// Re-read the manifest from disk, replacing the in-memory view.
    pub fn reload(&self) {
        let keys = load_manifest(&self.manifest_path());
        *self.keys.write() = keys;
    }

    fn persist(&self, keys: &[StoredKey]) -> Result<(), KeyStoreError> {
        self.storage.create_private_dir(&self.data_dir)?;
        let json = serde_json::to_vec_pretty(keys)?;
        self.storage
            .write_private_file(&self.manifest_path(), &json)?;
        Ok(())
    }

    fn write_public_record(&self, key: &StoredKey) -> Result<(), KeyStoreError> {
        let record = PublicKeyRecord {
            key_id: key.key_id.clone(),
            public_key: key.public_key.clone(),
            created_at: key.created_at,
            algorithm: key.algorithm.clone(),
        };
        let path = self.public_record_path(&key.key_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
        Ok(())
    }
}

impl PublicKeyResolver for KeyStore {
    fn resolve_public_key(&self, key_id: &str) -> Option<String> {
        self.get_key(key_id).map(|k| k.public_key)
    }
}

fn generate_stored_key() -> Result<StoredKey, KeyStoreError> {
    let keypair = generate_signing_keypair()?;
    Ok(StoredKey {
        key_id: derive_key_id(&keypair.fingerprint),
        private_key: keypair.private_key_pem,
        public_key: keypair.public_key_pem,
        created_at: Utc::now(),
        algorithm: KEY_ALGORITHM.to_string(),
        active: true,
    })
}

fn load_manifest(path: &Path) -> Vec<StoredKey> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            audit::log_key_manifest_load_failed(&path.display().to_string(), &e.to_string());
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<StoredKey>>(&bytes) {
        Ok(keys) => keys,
        Err(e) => {
            audit::log_key_manifest_load_failed(&path.display().to_string(), &e.to_string());
            Vec::new()
        }
    }
}
