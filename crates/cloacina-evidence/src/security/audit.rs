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

//! Security audit logging for SIEM integration.
//!
//! This module provides structured audit logging for all security-sensitive operations:
//! - Key lifecycle (create, rotate, manifest recovery)
//! - Evidence signing and verification
//! - Package export and offline package verification
//! - Chain audits
//!
//! All events use structured fields compatible with common SIEM systems.
//! Events are logged using the `tracing` crate at appropriate levels.

/// Event types for evidence operations.
pub mod events {
    /// Signing key created event type.
    pub const KEY_CREATED: &str = "key.created";
    /// Signing key rotated event type.
    pub const KEY_ROTATED: &str = "key.rotated";
    /// Key manifest could not be read or parsed.
    pub const KEY_MANIFEST_LOAD_FAILED: &str = "key.manifest.load_failed";
    /// Public key exported event type.
    pub const KEY_EXPORTED: &str = "key.exported";

    /// Evidence signed event type.
    pub const EVIDENCE_SIGNED: &str = "evidence.signed";
    /// Evidence verification failure event type.
    pub const EVIDENCE_VERIFICATION_FAILURE: &str = "evidence.verification.failure";

    /// Package exported event type.
    pub const PACKAGE_EXPORTED: &str = "package.exported";
    /// Package export failure event type.
    pub const PACKAGE_EXPORT_FAILED: &str = "package.export_failed";
    /// Package verification failure event type.
    pub const PACKAGE_VERIFICATION_FAILURE: &str = "package.verification.failure";

    /// Chain audit completed event type.
    pub const CHAIN_VERIFIED: &str = "chain.verified";
}

/// Log a signing key creation event.
pub fn log_key_created(key_id: &str, algorithm: &str) {
    tracing::info!(
        event_type = events::KEY_CREATED,
        key_id = %key_id,
        algorithm = %algorithm,
        "Signing key created"
    );
}

/// Log a key rotation event.
pub fn log_key_rotated(deactivated: &[String], new_key_id: &str) {
    tracing::warn!(
        event_type = events::KEY_ROTATED,
        deactivated_key_ids = %deactivated.join(","),
        new_key_id = %new_key_id,
        "Signing key rotated"
    );
}

/// Log a key manifest read/parse failure. The store continues as empty.
pub fn log_key_manifest_load_failed(manifest_path: &str, error: &str) {
    tracing::error!(
        event_type = events::KEY_MANIFEST_LOAD_FAILED,
        manifest_path = %manifest_path,
        error = %error,
        "Failed to load key manifest, treating key store as empty"
    );
}

/// Log a public key export event.
pub fn log_key_exported(key_id: &str) {
    tracing::info!(
        event_type = events::KEY_EXPORTED,
        key_id = %key_id,
        "Public key exported"
    );
}

/// Log an evidence signing event.
pub fn log_evidence_signed(evidence_id: &str, evidence_type: &str, key_id: &str, content_hash: &str) {
    tracing::debug!(
        event_type = events::EVIDENCE_SIGNED,
        evidence_id = %evidence_id,
        evidence_type = %evidence_type,
        key_id = %key_id,
        content_hash = %content_hash,
        "Evidence signed"
    );
}

/// Log an evidence verification failure.
pub fn log_evidence_verification_failure(evidence_id: &str, failure_reason: &str, key_id: Option<&str>) {
    tracing::warn!(
        event_type = events::EVIDENCE_VERIFICATION_FAILURE,
        evidence_id = %evidence_id,
        failure_reason = %failure_reason,
        key_id = key_id.unwrap_or("<unknown>"),
        "Evidence signature verification failed"
    );
}

/// Log a package export event.
pub fn log_package_exported(package_id: &str, evidence_count: usize, key_id: &str) {
    tracing::info!(
        event_type = events::PACKAGE_EXPORTED,
        package_id = %package_id,
        evidence_count = evidence_count,
        key_id = %key_id,
        "Evidence package exported"
    );
}

/// Log a package export failure.
pub fn log_package_export_failed(package_id: &str, error: &str) {
    tracing::error!(
        event_type = events::PACKAGE_EXPORT_FAILED,
        package_id = %package_id,
        error = %error,
        "Evidence package export failed"
    );
}

/// Log an offline package verification failure.
pub fn log_package_verification_failure(package_id: &str, failure_reason: &str) {
    tracing::warn!(
        event_type = events::PACKAGE_VERIFICATION_FAILURE,
        package_id = %package_id,
        failure_reason = %failure_reason,
        "Evidence package verification failed"
    );
}

/// Log the outcome of a chain audit.
pub fn log_chain_verified(total: usize, invalid: usize, missing: usize, chain_hash: &str) {
    if invalid == 0 && missing == 0 {
        tracing::info!(
            event_type = events::CHAIN_VERIFIED,
            total_evidence = total,
            invalid_signatures = invalid,
            missing_evidence = missing,
            chain_hash = %chain_hash,
            "Evidence chain verified"
        );
    } else {
        tracing::warn!(
            event_type = events::CHAIN_VERIFIED,
            total_evidence = total,
            invalid_signatures = invalid,
            missing_evidence = missing,
            chain_hash = %chain_hash,
            "Evidence chain verification found problems"
        );
    }
}
