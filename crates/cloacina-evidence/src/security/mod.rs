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

//! Security module for evidence signing keys.
//!
//! This module provides:
//! - [`KeyStore`] file-backed RSA key lifecycle (initialize, rotate, sign, verify)
//! - [`SecureStorage`] capability for owner-only files and directories
//! - Security audit logging for SIEM integration

pub mod audit;
mod key_store;
mod storage;

pub use key_store::{
    KeyInfo, KeyStore, KeyStoreError, PayloadSignature, PublicKeyRecord, PublicKeyResolver,
    StoredKey, KEY_MANIFEST_FILE, PUBLIC_KEY_DIR,
};
pub use storage::{PlatformSecureStorage, SecureStorage};
