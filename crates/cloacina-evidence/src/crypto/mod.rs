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

//! Cryptographic primitives for evidence signing.
//!
//! This module provides:
//! - RSA-2048 key generation and PEM encoding
//! - RSA-SHA256 (PKCS#1 v1.5) signing and verification over opaque payloads
//! - SHA256 hashing and key fingerprints

mod signing;

pub use signing::{
    compute_key_fingerprint, decode_private_key_pem, decode_public_key_pem, derive_key_id,
    generate_signing_keypair, sha256_hex, sign_payload, verify_payload, GeneratedKeypair,
    SigningError, KEY_ALGORITHM, RSA_KEY_BITS,
};
