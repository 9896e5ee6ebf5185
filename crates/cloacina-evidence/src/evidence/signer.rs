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

//! Stateless evidence signing and verification.
//!
//! [`EvidenceSigner`] holds at most one RSA key pair in process, either
//! imported from the [`KeyStore`](crate::security::KeyStore) at startup or
//! generated locally when no store is wired in.
//!
//! The signature covers a canonical payload built from every non-content
//! field plus `contentHash`:
//!
//! ```text
//! {"contentHash":..,"id":..,"metadata":{..},"projectId":..,"source":..,"timestamp":..,"type":..}
//! ```
//!
//! `timestamp` is rendered as RFC 3339 with millisecond precision and a `Z`
//! suffix.

use super::{Evidence, EvidenceError, SignedEvidence};
use crate::canonical::{is_supported_version, to_canonical_string, CANONICALIZATION_VERSION};
use crate::crypto::{
    compute_key_fingerprint, decode_private_key_pem, decode_public_key_pem, derive_key_id,
    generate_signing_keypair, sha256_hex, sign_payload, verify_payload, SigningError,
};
use crate::security::audit;
use chrono::{SecondsFormat, SubsecRound};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

struct LoadedKeys {
    key_id: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_pem: String,
}

/// Signs evidence and verifies signed evidence.
#[derive(Default)]
pub struct EvidenceSigner {
    keys: Option<LoadedKeys>,
}

impl std::fmt::Debug for EvidenceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceSigner")
            .field("key_id", &self.key_id())
            .finish()
    }
}

impl EvidenceSigner {
    /// Create a signer with no key material.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and hold a fresh in-process key pair. Returns its key id.
    pub fn generate_key_pair(&mut self) -> Result<String, SigningError> {
        let keypair = generate_signing_keypair()?;
        let key_id = derive_key_id(&keypair.fingerprint);
        self.import_key_pair(&keypair.private_key_pem, &keypair.public_key_pem, &key_id)?;
        tracing::info!(key_id = %key_id, "Generated local evidence signing key");
        Ok(key_id)
    }

    /// Adopt externally managed key material.
    pub fn import_key_pair(
        &mut self,
        private_key_pem: &str,
        public_key_pem: &str,
        key_id: &str,
    ) -> Result<(), SigningError> {
        let private_key = decode_private_key_pem(private_key_pem)?;
        let public_key = decode_public_key_pem(public_key_pem)?;

        if RsaPublicKey::from(&private_key) != public_key {
            return Err(SigningError::InvalidPublicKey(
                "public key does not match private key".to_string(),
            ));
        }

        self.keys = Some(LoadedKeys {
            key_id: key_id.to_string(),
            private_key,
            public_key,
            public_key_pem: public_key_pem.to_string(),
        });
        Ok(())
    }

    /// Deterministic SHA256 hex of evidence content.
    ///
    /// Strings are hashed as their UTF-8 bytes; everything else is hashed
    /// in canonical JSON form, so key order never affects the result.
    pub fn hash_content(content: &Value) -> String {
        match content {
            Value::String(s) => sha256_hex(s.as_bytes()),
            other => sha256_hex(to_canonical_string(other).as_bytes()),
        }
    }

    /// The canonical payload that gets signed for `evidence`.
    pub fn signature_payload(evidence: &Evidence, content_hash: &str) -> String {
        let payload = json!({
            "id": evidence.id,
            "type": evidence.evidence_type.as_str(),
            "source": evidence.source,
            "projectId": evidence.project_id,
            "timestamp": evidence.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "contentHash": content_hash,
            "metadata": evidence.metadata,
        });
        to_canonical_string(&payload)
    }

    /// Sign `evidence`, generating a key pair first if none is held.
    ///
    /// The timestamp is truncated to millisecond precision first; the signed
    /// payload carries it at that precision.
    pub fn sign_evidence(
        &mut self,
        mut evidence: Evidence,
        signed_by: &str,
    ) -> Result<SignedEvidence, EvidenceError> {
        evidence.timestamp = evidence.timestamp.trunc_subsecs(3);
        if self.keys.is_none() {
            self.generate_key_pair()?;
        }
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| SigningError::SignatureFailed("no key material".to_string()))?;

        let content_hash = Self::hash_content(&evidence.content);
        let payload = Self::signature_payload(&evidence, &content_hash);
        let signature = sign_payload(payload.as_bytes(), &keys.private_key)?;

        audit::log_evidence_signed(
            &evidence.id,
            evidence.evidence_type.as_str(),
            &keys.key_id,
            &content_hash,
        );

        Ok(SignedEvidence {
            evidence,
            signature,
            content_hash,
            signed_at: super::now_millis(),
            signed_by: signed_by.to_string(),
            key_id: keys.key_id.clone(),
            canonicalization_version: CANONICALIZATION_VERSION,
        })
    }

    /// Verify signed evidence against `public_key_pem`, or the held key.
    ///
    /// Never fails; any problem verifies as `false`.
    pub fn verify_signature(&self, signed: &SignedEvidence, public_key_pem: Option<&str>) -> bool {
        match public_key_pem {
            Some(pem) => match decode_public_key_pem(pem) {
                Ok(public_key) => verify_with_key(signed, &public_key),
                Err(e) => {
                    audit::log_evidence_verification_failure(
                        signed.id(),
                        &format!("malformed_public_key: {e}"),
                        Some(&signed.key_id),
                    );
                    false
                }
            },
            None => match &self.keys {
                Some(keys) => verify_with_key(signed, &keys.public_key),
                None => {
                    audit::log_evidence_verification_failure(
                        signed.id(),
                        "no_public_key",
                        Some(&signed.key_id),
                    );
                    false
                }
            },
        }
    }

    /// The held public key as SPKI PEM.
    pub fn export_public_key(&self) -> Option<&str> {
        self.keys.as_ref().map(|k| k.public_key_pem.as_str())
    }

    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.keys.as_ref().map(|k| k.key_id.as_str())
    }

    /// SHA256 fingerprint of the held public key.
    pub fn fingerprint(&self) -> Option<String> {
        self.keys
            .as_ref()
            .and_then(|k| compute_key_fingerprint(&k.public_key).ok())
    }
}

/// Verify `signed` with a parsed public key.
pub(crate) fn verify_with_key(signed: &SignedEvidence, public_key: &RsaPublicKey) -> bool {
    if !is_supported_version(signed.canonicalization_version) {
        audit::log_evidence_verification_failure(
            signed.id(),
            &format!(
                "unsupported_canonicalization_version: {}",
                signed.canonicalization_version
            ),
            Some(&signed.key_id),
        );
        return false;
    }

    // Sub-millisecond digits are not covered by the signature.
    if signed.evidence.timestamp.timestamp_subsec_nanos() % 1_000_000 != 0 {
        audit::log_evidence_verification_failure(
            signed.id(),
            "timestamp_precision_exceeds_signed_payload",
            Some(&signed.key_id),
        );
        return false;
    }

    let content_hash = EvidenceSigner::hash_content(&signed.evidence.content);
    if content_hash != signed.content_hash {
        audit::log_evidence_verification_failure(
            signed.id(),
            "content_hash_mismatch",
            Some(&signed.key_id),
        );
        return false;
    }

    let payload = EvidenceSigner::signature_payload(&signed.evidence, &content_hash);
    match verify_payload(payload.as_bytes(), &signed.signature, public_key) {
        Ok(()) => true,
        Err(e) => {
            audit::log_evidence_verification_failure(
                signed.id(),
                &e.to_string(),
                Some(&signed.key_id),
            );
            false
        }
    }
}
