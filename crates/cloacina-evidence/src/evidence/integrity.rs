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

//! Whole-set integrity reporting and chain hashes.
//!
//! Two chain hash schemes exist:
//!
//! - [`ChainHashMode::IdList`]: SHA256 over the canonical JSON array of sorted
//!   evidence ids. Only a coarse completeness check; content tampering and
//!   reordering go unnoticed. Kept for compatibility with older reports.
//! - [`ChainHashMode::Cumulative`]: records are ordered by `(timestamp, id)`
//!   and folded as `chain[i] = H(chain[i-1] || entry_hash(record[i]))`, with
//!   `chain[-1]` the empty string. An empty set hashes to `H("")`. Deleting, reordering, or altering any
//!   record changes the result.

use super::signer::EvidenceSigner;
use super::SignedEvidence;
use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Which chain hash scheme to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainHashMode {
    #[default]
    Cumulative,
    IdList,
}

impl ChainHashMode {
    /// Name recorded in reports.
    pub fn algorithm(&self) -> &'static str {
        match self {
            ChainHashMode::Cumulative => "sha256-cumulative-v1",
            ChainHashMode::IdList => "sha256-id-list-v0",
        }
    }
}

/// Outcome of verifying one record during an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityDetail {
    pub evidence_id: String,
    pub valid: bool,
    pub key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of a full audit pass over the evidence index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub total_evidence: usize,
    pub valid_signatures: usize,
    pub invalid_signatures: usize,
    pub missing_evidence: usize,
    pub chain_hash: String,
    pub chain_algorithm: String,
    pub is_valid: bool,
    pub details: Vec<IntegrityDetail>,
}

/// Compute the chain hash over `records` using `mode`.
pub fn compute_chain_hash(records: &[&SignedEvidence], mode: ChainHashMode) -> String {
    match mode {
        ChainHashMode::IdList => {
            let mut ids: Vec<&str> = records.iter().map(|r| r.id()).collect();
            ids.sort_unstable();
            EvidenceSigner::hash_content(&json!(ids))
        }
        ChainHashMode::Cumulative => {
            let mut ordered: Vec<&SignedEvidence> = records.to_vec();
            ordered.sort_by(|a, b| {
                a.timestamp()
                    .cmp(&b.timestamp())
                    .then_with(|| a.id().cmp(b.id()))
            });

            if ordered.is_empty() {
                return sha256_hex(b"");
            }

            ordered.into_iter().fold(String::new(), |prev, record| {
                let mut link = prev;
                link.push_str(&entry_hash(record));
                sha256_hex(link.as_bytes())
            })
        }
    }
}

/// Hash of one record as it participates in the cumulative chain.
///
/// Uses the recomputed content hash, so content edits alter the chain even
/// when the stored `contentHash` is left untouched.
fn entry_hash(record: &SignedEvidence) -> String {
    let content_hash = EvidenceSigner::hash_content(&record.evidence.content);
    let payload = EvidenceSigner::signature_payload(&record.evidence, &content_hash);
    sha256_hex(format!("{payload}.{}", record.signature).as_bytes())
}
