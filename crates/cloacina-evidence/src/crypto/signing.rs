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

//! RSA-SHA256 signing utilities for evidence signatures.
//!
//! Provides functions for:
//! - Generating RSA-2048 signing keypairs (PKCS#8 / SPKI PEM)
//! - Computing SHA256 key fingerprints and key identifiers
//! - Signing payloads with base64 output
//! - Verifying base64 signatures

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Modulus size for generated keys.
pub const RSA_KEY_BITS: usize = 2048;

/// Algorithm identifier recorded alongside stored keys.
pub const KEY_ALGORITHM: &str = "RSA-SHA256";

/// Errors that can occur during signing operations.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Failed to generate key: {0}")]
    KeyGenerationFailed(String),

    #[error("Invalid private key PEM: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid public key PEM: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Failed to create signature: {0}")]
    SignatureFailed(String),

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// A generated RSA keypair, PEM encoded.
#[derive(Clone)]
pub struct GeneratedKeypair {
    /// PKCS#8 PEM private key
    pub private_key_pem: String,
    /// SPKI PEM public key
    pub public_key_pem: String,
    /// SHA256 hex fingerprint of the DER public key
    pub fingerprint: String,
}

impl std::fmt::Debug for GeneratedKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeypair")
            .field("private_key_pem", &"<redacted>")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Generates a new RSA-2048 signing keypair.
pub fn generate_signing_keypair() -> Result<GeneratedKeypair, SigningError> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| SigningError::KeyGenerationFailed(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.as_str().to_owned())
        .map_err(|e| SigningError::KeyGenerationFailed(e.to_string()))?;
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| SigningError::KeyGenerationFailed(e.to_string()))?;
    let fingerprint = compute_key_fingerprint(&public_key)?;

    Ok(GeneratedKeypair {
        private_key_pem,
        public_key_pem,
        fingerprint,
    })
}

/// Parses a PKCS#8 PEM private key.
pub fn decode_private_key_pem(pem: &str) -> Result<RsaPrivateKey, SigningError> {
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| SigningError::InvalidPrivateKey(e.to_string()))
}

/// Parses an SPKI PEM public key.
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey, SigningError> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| SigningError::InvalidPublicKey(e.to_string()))
}

/// Computes the SHA256 hex fingerprint of a public key's DER encoding.
pub fn compute_key_fingerprint(public_key: &RsaPublicKey) -> Result<String, SigningError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| SigningError::InvalidPublicKey(e.to_string()))?;
    Ok(sha256_hex(der.as_bytes()))
}

/// Derives a key identifier from a fingerprint.
pub fn derive_key_id(fingerprint: &str) -> String {
    let len = fingerprint.len().min(16);
    format!("key-{}", &fingerprint[..len])
}

/// Computes the lowercase hex SHA256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Signs a payload with RSA-SHA256 and returns the base64 signature.
pub fn sign_payload(payload: &[u8], private_key: &RsaPrivateKey) -> Result<String, SigningError> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign(payload)
        .map_err(|e| SigningError::SignatureFailed(e.to_string()))?;
    Ok(BASE64.encode(signature.to_bytes()))
}

/// Verifies a base64 RSA-SHA256 signature over a payload.
///
/// # Errors
///
/// Returns `SigningError::InvalidSignature` if the signature is not decodable,
/// and `SigningError::VerificationFailed` if it does not match.
pub fn verify_payload(
    payload: &[u8],
    signature_b64: &str,
    public_key: &RsaPublicKey,
) -> Result<(), SigningError> {
    let raw = BASE64
        .decode(signature_b64)
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    verifying_key
        .verify(payload, &signature)
        .map_err(|_| SigningError::VerificationFailed)
}
