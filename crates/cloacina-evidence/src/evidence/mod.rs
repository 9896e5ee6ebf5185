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

//! Evidence records and their signed form.
//!
//! An [`Evidence`] is an unsigned observation captured from the orchestration
//! system. [`EvidenceSigner`] turns it into a [`SignedEvidence`], which is
//! immutable from then on: any change to any field invalidates verification.
//!
//! The JSON field names (`projectId`, `contentHash`, ...) are part of the
//! export format and must not change.

mod collector;
mod integrity;
mod package;
mod signer;

pub use collector::{AgentOutputContext, CollectorState, CollectorStatus, EvidenceCollector};
pub use integrity::{
    compute_chain_hash, ChainHashMode, IntegrityDetail, IntegrityReport,
};
pub use package::{
    parse_package_signature, verify_evidence_package, EvidenceFilter, EvidenceManifest,
    EvidencePackage, ManifestSignatures, PackageVerificationError,
};
pub use signer::EvidenceSigner;

use crate::canonical::CANONICALIZATION_VERSION;
use crate::crypto::SigningError;
use crate::security::KeyStoreError;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// String-keyed auxiliary tags attached to evidence.
pub type Metadata = BTreeMap<String, String>;

/// Errors that can occur while signing, collecting, or exporting evidence.
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Package signing unavailable: key store has no active key")]
    PackageSigningUnavailable,

    #[error("Key rotation unavailable: no key store configured")]
    KeyStoreUnavailable,

    #[error("Evidence already collected: {0}")]
    Duplicate(String),
}

/// The kind of observation an evidence record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    AgentOutput,
    TaskCompletion,
    Finding,
    StateTransition,
    Approval,
}

impl EvidenceType {
    /// All evidence types, in declaration order.
    pub const ALL: [EvidenceType; 5] = [
        EvidenceType::AgentOutput,
        EvidenceType::TaskCompletion,
        EvidenceType::Finding,
        EvidenceType::StateTransition,
        EvidenceType::Approval,
    ];

    /// The wire tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::AgentOutput => "agent_output",
            EvidenceType::TaskCompletion => "task_completion",
            EvidenceType::Finding => "finding",
            EvidenceType::StateTransition => "state_transition",
            EvidenceType::Approval => "approval",
        }
    }

    /// Whether evidence of this type is always relevant to compliance audits.
    pub fn is_compliance_relevant(&self) -> bool {
        matches!(
            self,
            EvidenceType::TaskCompletion
                | EvidenceType::Finding
                | EvidenceType::StateTransition
                | EvidenceType::Approval
        )
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvidenceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown evidence type: {s}"))
    }
}

/// An unsigned observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    /// Originating subsystem, e.g. `agent:reviewer` or `monitoring`
    pub source: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: Value,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Evidence {
    /// Create evidence stamped with the current time and no metadata.
    pub fn new(
        id: impl Into<String>,
        evidence_type: EvidenceType,
        source: impl Into<String>,
        project_id: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: id.into(),
            evidence_type,
            source: source.into(),
            project_id: project_id.into(),
            timestamp: now_millis(),
            content,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata tag.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn default_canonicalization_version() -> u32 {
    CANONICALIZATION_VERSION
}

/// Evidence plus the signature proving its origin and integrity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEvidence {
    #[serde(flatten)]
    pub evidence: Evidence,
    /// Base64 RSA-SHA256 signature over the canonical signature payload
    pub signature: String,
    /// SHA256 hex of the canonical content
    pub content_hash: String,
    pub signed_at: DateTime<Utc>,
    pub signed_by: String,
    /// Key that produced `signature`
    pub key_id: String,
    #[serde(default = "default_canonicalization_version")]
    pub canonicalization_version: u32,
}

impl SignedEvidence {
    pub fn id(&self) -> &str {
        &self.evidence.id
    }

    pub fn evidence_type(&self) -> EvidenceType {
        self.evidence.evidence_type
    }

    pub fn project_id(&self) -> &str {
        &self.evidence.project_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.evidence.timestamp
    }
}

/// Current time truncated to millisecond precision.
///
/// Timestamps appear in signature payloads at millisecond precision, so
/// they are stored that way too.
pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
