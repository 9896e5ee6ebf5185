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

//! Key store lifecycle tests.
//!
//! These tests exercise the key store through its on-disk layout: the
//! private manifest and the public audit records auditors are given.

use cloacina_evidence::security::{PublicKeyRecord, KEY_MANIFEST_FILE};
use cloacina_evidence::KeyStore;
use tempfile::TempDir;

#[test]
fn test_initialize_twice_returns_same_key() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path());

    let first = store.initialize().unwrap();
    let second = store.initialize().unwrap();

    assert_eq!(first.key_id, second.key_id);
    assert_eq!(store.list_keys().len(), 1);
}

#[test]
fn test_key_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let key_id = KeyStore::open(dir.path()).initialize().unwrap().key_id;

    let reopened = KeyStore::open(dir.path());

    assert_eq!(reopened.get_active_key().unwrap().key_id, key_id);
    assert_eq!(reopened.initialize().unwrap().key_id, key_id);
}

#[test]
fn test_rotation_leaves_exactly_one_active_key() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path());
    let original = store.initialize().unwrap();

    let rotated = store.rotate_key().unwrap();
    store.rotate_key().unwrap();

    let keys = store.list_keys();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys.iter().filter(|k| k.active).count(), 1);
    assert!(!store.get_key(&original.key_id).unwrap().active);
    assert!(!store.get_key(&rotated.key_id).unwrap().active);
}

#[test]
fn test_signatures_verify_after_rotation() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path());
    store.initialize().unwrap();

    let before = store.sign_payload("manifest-hash").unwrap();
    store.rotate_key().unwrap();
    let after = store.sign_payload("manifest-hash").unwrap();

    assert_ne!(before.key_id, after.key_id);
    assert!(store.verify_signature("manifest-hash", &before.signature, &before.key_id));
    assert!(store.verify_signature("manifest-hash", &after.signature, &after.key_id));
    assert!(!store.verify_signature("manifest-hash", &before.signature, &after.key_id));
}

#[test]
fn test_public_records_hold_no_private_material() {
    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path());
    let first = store.initialize().unwrap();
    let second = store.rotate_key().unwrap();

    for key in [&first, &second] {
        let raw = std::fs::read_to_string(store.public_record_path(&key.key_id)).unwrap();
        assert!(!raw.contains("PRIVATE KEY"));

        let record: PublicKeyRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.key_id, key.key_id);
        assert_eq!(record.public_key, key.public_key);
        assert_eq!(record.algorithm, "RSA-SHA256");
    }
}

#[test]
fn test_corrupt_manifest_starts_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(KEY_MANIFEST_FILE), b"{ not json").unwrap();

    let store = KeyStore::open(dir.path());
    assert!(store.list_keys().is_empty());
    assert!(store.sign_payload("anything").is_none());

    let key = store.initialize().unwrap();
    assert_eq!(KeyStore::open(dir.path()).get_active_key().unwrap().key_id, key.key_id);
}

#[cfg(unix)]
#[test]
fn test_manifest_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = KeyStore::open(dir.path().join("keys"));
    store.initialize().unwrap();

    let file_mode = std::fs::metadata(store.manifest_path())
        .unwrap()
        .permissions()
        .mode();
    let dir_mode = std::fs::metadata(store.data_dir())
        .unwrap()
        .permissions()
        .mode();

    assert_eq!(file_mode & 0o777, 0o600);
    assert_eq!(dir_mode & 0o777, 0o700);
}
