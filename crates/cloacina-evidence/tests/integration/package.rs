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

//! Package export and offline verification tests.
//!
//! A package must verify using nothing but the public key records written by
//! the key store, and any edit to the package must break verification.

use crate::fixtures::{finding, new_context, test_config, RecordingHandler};
use cloacina_evidence::events::names;
use cloacina_evidence::security::{PublicKeyRecord, PUBLIC_KEY_DIR};
use cloacina_evidence::{
    verify_evidence_package, EventBus, EvidenceCollector, EvidenceContext, EvidenceError,
    EvidenceFilter, EvidencePackage, EvidenceType, LocalEventBus, PackageVerificationError,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

async fn seed(context: &EvidenceContext) {
    let collector = context.collector();
    for i in 0..3 {
        collector
            .collect_from_task_completion(&format!("t{i}"), json!({"step": i}), "proj-1")
            .await
            .unwrap();
    }
    for i in 0..2 {
        collector
            .collect_from_finding(&finding(&format!("f{i}")), "proj-2")
            .await
            .unwrap();
    }
}

/// Public keys as an auditor would load them: from the public record files.
fn auditor_keys(dir: &TempDir) -> HashMap<String, String> {
    std::fs::read_dir(dir.path().join(PUBLIC_KEY_DIR))
        .unwrap()
        .map(|entry| {
            let raw = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            let record: PublicKeyRecord = serde_json::from_str(&raw).unwrap();
            (record.key_id, record.public_key)
        })
        .collect()
}

#[tokio::test]
async fn test_export_filters_by_project() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default().project("proj-1"))
        .await
        .unwrap();

    assert_eq!(package.manifest.total_evidence, 3);
    assert_eq!(package.evidence.len(), 3);
    assert_eq!(package.manifest.evidence_ids.len(), 3);
    assert!(package.evidence.iter().all(|e| e.project_id() == "proj-1"));
    assert_eq!(package.signature, package.manifest.signatures.package_signature);

    let active = context.key_store().get_active_key().unwrap();
    assert!(package.signature.starts_with(&format!("{}:", active.key_id)));

    let timestamps: Vec<_> = package.evidence.iter().map(|e| e.timestamp()).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
}

#[tokio::test]
async fn test_export_combines_filters() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let findings = context
        .collector()
        .export_evidence_package(
            EvidenceFilter::default()
                .project("proj-2")
                .of_type(EvidenceType::Finding)
                .source("monitoring"),
        )
        .await
        .unwrap();
    assert_eq!(findings.manifest.total_evidence, 2);

    let none = context
        .collector()
        .export_evidence_package(
            EvidenceFilter::default()
                .project("proj-1")
                .of_type(EvidenceType::Finding),
        )
        .await
        .unwrap();
    assert_eq!(none.manifest.total_evidence, 0);
    assert!(verify_evidence_package(&none, context.key_store().as_ref()).is_ok());
}

#[tokio::test]
async fn test_package_verifies_offline_from_public_records() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default())
        .await
        .unwrap();

    let file = dir.path().join("package.json");
    package.write_to_file(&file).unwrap();
    drop(context);

    let loaded = EvidencePackage::read_from_file(&file).unwrap();
    assert_eq!(loaded, package);
    assert!(verify_evidence_package(&loaded, &auditor_keys(&dir)).is_ok());
}

#[tokio::test]
async fn test_package_spanning_rotation_verifies() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    let collector = context.collector();

    collector
        .collect_from_task_completion("before", json!("done"), "proj-1")
        .await
        .unwrap();
    collector.rotate_signing_key().unwrap();
    collector
        .collect_from_task_completion("after", json!("done"), "proj-1")
        .await
        .unwrap();

    let package = collector
        .export_evidence_package(EvidenceFilter::default().project("proj-1"))
        .await
        .unwrap();

    let key_ids: Vec<_> = package.evidence.iter().map(|e| e.key_id.clone()).collect();
    assert_eq!(key_ids.len(), 2);
    assert_ne!(key_ids[0], key_ids[1]);
    assert!(verify_evidence_package(&package, &auditor_keys(&dir)).is_ok());
}

#[tokio::test]
async fn test_tampered_evidence_fails_package_verification() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let mut package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default().project("proj-1"))
        .await
        .unwrap();
    package.evidence[0].evidence.content = json!({"step": 99});

    let result = verify_evidence_package(&package, context.key_store().as_ref());
    assert!(matches!(
        result,
        Err(PackageVerificationError::InvalidEvidenceSignature(_))
    ));
}

#[tokio::test]
async fn test_removed_evidence_fails_package_verification() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let mut package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default().project("proj-1"))
        .await
        .unwrap();
    package.evidence.pop();

    let result = verify_evidence_package(&package, context.key_store().as_ref());
    assert!(matches!(
        result,
        Err(PackageVerificationError::ManifestMismatch(_))
    ));
}

#[tokio::test]
async fn test_edited_manifest_fails_package_verification() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let mut package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default().project("proj-1"))
        .await
        .unwrap();
    package.manifest.filters = EvidenceFilter::default().project("proj-9");

    let result = verify_evidence_package(&package, context.key_store().as_ref());
    assert!(matches!(
        result,
        Err(PackageVerificationError::InvalidPackageSignature)
    ));
}

#[tokio::test]
async fn test_unknown_key_fails_package_verification() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    seed(&context).await;

    let package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default())
        .await
        .unwrap();

    let result = verify_evidence_package(&package, &HashMap::<String, String>::new());
    assert!(matches!(result, Err(PackageVerificationError::UnknownKey(_))));
}

#[tokio::test]
async fn test_export_without_key_store_fails() {
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(LocalEventBus::new());
    let collector = EvidenceCollector::new(test_config(&dir), bus);
    collector
        .collect_from_task_completion("t1", json!("done"), "proj-1")
        .await
        .unwrap();

    let result = collector
        .export_evidence_package(EvidenceFilter::default())
        .await;

    assert!(matches!(result, Err(EvidenceError::PackageSigningUnavailable)));
}

#[tokio::test]
async fn test_export_publishes_notification() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);
    let listener = Arc::new(RecordingHandler::default());
    bus.subscribe(names::EVIDENCE_PACKAGE_EXPORTED, listener.clone());
    seed(&context).await;

    let package = context
        .collector()
        .export_evidence_package(EvidenceFilter::default().project("proj-2"))
        .await
        .unwrap();

    let received = listener.received.lock();
    assert_eq!(received.len(), 1);
    let (_, payload) = &received[0];
    assert_eq!(payload["packageId"], json!(package.id));
    assert_eq!(payload["evidenceCount"], json!(2));
    assert_eq!(payload["filters"]["projectId"], json!("proj-2"));
}
