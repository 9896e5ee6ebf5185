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

//! Evidence package export format and offline verification.
//!
//! An [`EvidencePackage`] is the exportable, independently auditable unit:
//! the selected signed evidence, a manifest describing the selection, and a
//! package signature of the form `<keyId>:<base64 signature>`.
//!
//! The package signature covers the manifest hash, computed as
//! [`EvidenceSigner::hash_content`] over the manifest with
//! `signatures.packageSignature` set to the empty string. The hex hash string
//! itself is the signed payload.

use super::signer::{verify_with_key, EvidenceSigner};
use super::{EvidenceType, SignedEvidence};
use crate::crypto::{decode_public_key_pem, verify_payload};
use crate::security::{audit, PublicKeyResolver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors found while verifying an exported package.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackageVerificationError {
    #[error("Malformed package signature: {0}")]
    MalformedSignature(String),

    #[error("Package signature does not match manifest")]
    SignatureMismatch,

    #[error("Manifest does not describe the packaged evidence: {0}")]
    ManifestMismatch(String),

    #[error("No public key available for key id {0}")]
    UnknownKey(String),

    #[error("Evidence signature invalid: {0}")]
    InvalidEvidenceSignature(String),

    #[error("Package signature invalid")]
    InvalidPackageSignature,

    #[error("Manifest could not be serialized: {0}")]
    Serialization(String),
}

/// Selection predicates for export. Absent fields match everything; present
/// fields are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub evidence_type: Option<EvidenceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Inclusive lower bound on `timestamp`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Matches the `agentRole` metadata tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
}

impl EvidenceFilter {
    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn of_type(mut self, evidence_type: EvidenceType) -> Self {
        self.evidence_type = Some(evidence_type);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    /// Whether `record` satisfies every present predicate.
    pub fn matches(&self, record: &SignedEvidence) -> bool {
        let evidence = &record.evidence;

        if let Some(project_id) = &self.project_id {
            if &evidence.project_id != project_id {
                return false;
            }
        }
        if let Some(evidence_type) = self.evidence_type {
            if evidence.evidence_type != evidence_type {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &evidence.source != source {
                return false;
            }
        }
        if let Some(since) = self.since {
            if evidence.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if evidence.timestamp > until {
                return false;
            }
        }
        if let Some(role) = &self.agent_role {
            if evidence.metadata.get("agentRole") != Some(role) {
                return false;
            }
        }
        true
    }
}

/// Signatures recorded in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSignatures {
    /// Evidence id to evidence signature
    pub evidence_signatures: BTreeMap<String, String>,
    /// `<keyId>:<signature>` over the manifest hash
    pub package_signature: String,
}

/// Metadata describing one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceManifest {
    pub package_id: String,
    pub created_at: DateTime<Utc>,
    pub total_evidence: usize,
    pub evidence_ids: Vec<String>,
    pub filters: EvidenceFilter,
    pub signatures: ManifestSignatures,
}

impl EvidenceManifest {
    /// Hash covered by the package signature.
    pub fn signing_hash(&self) -> Result<String, serde_json::Error> {
        let mut unsigned = self.clone();
        unsigned.signatures.package_signature = String::new();
        let value = serde_json::to_value(&unsigned)?;
        Ok(EvidenceSigner::hash_content(&value))
    }
}

/// The exportable unit of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePackage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub evidence: Vec<SignedEvidence>,
    pub manifest: EvidenceManifest,
    pub signature: String,
}

impl EvidencePackage {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a package from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write the package as JSON to `path`.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Read a package from a JSON file.
    pub fn read_from_file(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Split a `<keyId>:<signature>` package signature.
pub fn parse_package_signature(value: &str) -> Option<(&str, &str)> {
    let (key_id, signature) = value.split_once(':')?;
    if key_id.is_empty() || signature.is_empty() {
        return None;
    }
    Some((key_id, signature))
}

/// Re-verify an exported package without the originating process.
///
/// Checks, in order: the package signature matches the manifest, the
/// manifest lists exactly the packaged evidence, every evidence signature
/// verifies under its recorded key, and the package signature verifies over
/// the manifest hash.
pub fn verify_evidence_package<R>(
    package: &EvidencePackage,
    keys: &R,
) -> Result<(), PackageVerificationError>
where
    R: PublicKeyResolver + ?Sized,
{
    let result = verify_package_inner(package, keys);
    if let Err(e) = &result {
        audit::log_package_verification_failure(&package.id, &e.to_string());
    }
    result
}

fn verify_package_inner<R>(
    package: &EvidencePackage,
    keys: &R,
) -> Result<(), PackageVerificationError>
where
    R: PublicKeyResolver + ?Sized,
{
    let manifest = &package.manifest;

    if package.signature != manifest.signatures.package_signature {
        return Err(PackageVerificationError::SignatureMismatch);
    }
    if manifest.package_id != package.id {
        return Err(PackageVerificationError::ManifestMismatch(format!(
            "manifest package id {} != package id {}",
            manifest.package_id, package.id
        )));
    }

    let ids: Vec<&str> = package.evidence.iter().map(|e| e.id()).collect();
    let listed: Vec<&str> = manifest.evidence_ids.iter().map(String::as_str).collect();
    if ids != listed || manifest.total_evidence != ids.len() {
        return Err(PackageVerificationError::ManifestMismatch(
            "evidence ids differ from packaged evidence".to_string(),
        ));
    }

    for record in &package.evidence {
        if manifest.signatures.evidence_signatures.get(record.id()) != Some(&record.signature) {
            return Err(PackageVerificationError::ManifestMismatch(format!(
                "signature for {} differs from manifest",
                record.id()
            )));
        }

        let pem = keys
            .resolve_public_key(&record.key_id)
            .ok_or_else(|| PackageVerificationError::UnknownKey(record.key_id.clone()))?;
        let public_key = decode_public_key_pem(&pem)
            .map_err(|_| PackageVerificationError::UnknownKey(record.key_id.clone()))?;
        if !verify_with_key(record, &public_key) {
            return Err(PackageVerificationError::InvalidEvidenceSignature(
                record.id().to_string(),
            ));
        }
    }

    let (key_id, signature) = parse_package_signature(&package.signature)
        .ok_or_else(|| PackageVerificationError::MalformedSignature(package.signature.clone()))?;
    let pem = keys
        .resolve_public_key(key_id)
        .ok_or_else(|| PackageVerificationError::UnknownKey(key_id.to_string()))?;
    let public_key = decode_public_key_pem(&pem)
        .map_err(|_| PackageVerificationError::UnknownKey(key_id.to_string()))?;

    let hash = manifest
        .signing_hash()
        .map_err(|e| PackageVerificationError::Serialization(e.to_string()))?;
    verify_payload(hash.as_bytes(), signature, &public_key)
        .map_err(|_| PackageVerificationError::InvalidPackageSignature)
}
