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

//! # Evidence Collector
//!
//! The event-driven side of the subsystem. The collector subscribes to
//! orchestration events, turns them into typed [`Evidence`], signs them with
//! [`EvidenceSigner`], indexes them in memory, and mirrors them into workspace
//! storage on a best-effort basis.
//!
//! ## Lifecycle
//!
//! `Idle -> Collecting -> Idle` via [`start_collecting`](EvidenceCollector::start_collecting)
//! and [`stop_collecting`](EvidenceCollector::stop_collecting). Starting twice
//! is a logged no-op; stopping removes every handler registered at start.
//!
//! ## Durability
//!
//! The in-memory index is a cache for the lifetime of the process. Evidence
//! counts as collected once it is signed and indexed; mirroring failures are
//! logged and do not fail collection.
//!
//! Package export and chain verification scan the whole index, so both are
//! O(n) with no pagination.

use super::integrity::{compute_chain_hash, IntegrityDetail, IntegrityReport};
use super::package::{EvidenceFilter, EvidenceManifest, EvidencePackage, ManifestSignatures};
use super::signer::{verify_with_key, EvidenceSigner};
use super::{now_millis, Evidence, EvidenceError, EvidenceType, SignedEvidence};
use crate::config::EvidenceConfig;
use crate::crypto::decode_public_key_pem;
use crate::events::{
    names, AgentOutputEvent, EventBus, EventHandler, EvidenceCollectedEvent, Finding,
    FindingEvent, PackageExportedEvent, StateTransition, StateTransitionEvent,
    SubscriptionId, TaskCompletedEvent,
};
use crate::security::{audit, KeyStore, PublicKeyResolver};
use crate::workspace::{ArtifactUpdateOptions, WorkspaceStore};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Source tag for mirrored artifacts.
const MIRROR_SOURCE: &str = "evidence-collector";

/// Whether the collector is subscribed to the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    Idle,
    Collecting,
}

/// Snapshot returned by [`EvidenceCollector::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub state: CollectorState,
    pub evidence_count: usize,
    pub active_subscriptions: usize,
    pub key_id: Option<String>,
    pub by_type: BTreeMap<String, usize>,
}

/// Context accompanying an agent's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutputContext {
    pub project_id: String,
    pub task_id: Option<String>,
    pub agent_role: Option<String>,
}

impl AgentOutputContext {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }
}

/// Collects, signs, indexes, exports, and audits evidence.
pub struct EvidenceCollector {
    config: EvidenceConfig,
    signer: Mutex<EvidenceSigner>,
    key_store: Option<Arc<KeyStore>>,
    bus: Arc<dyn EventBus>,
    workspace: Option<Arc<dyn WorkspaceStore>>,
    index: RwLock<HashMap<String, SignedEvidence>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl std::fmt::Debug for EvidenceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceCollector")
            .field("state", &self.state())
            .field("evidence", &self.index.read().len())
            .field("key_store", &self.key_store.is_some())
            .field("workspace", &self.workspace.is_some())
            .finish()
    }
}

impl EvidenceCollector {
    /// Create a collector with a locally generated signing key and no
    /// durable key store. Package export requires a key store.
    pub fn new(config: EvidenceConfig, bus: Arc<dyn EventBus>) -> Self {
        Self {
            config,
            signer: Mutex::new(EvidenceSigner::new()),
            key_store: None,
            bus,
            workspace: None,
            index: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Sign with the key store's active key, bootstrapping one if needed.
    pub fn with_key_store(mut self, key_store: Arc<KeyStore>) -> Result<Self, EvidenceError> {
        let key = key_store.initialize()?;
        self.signer
            .get_mut()
            .import_key_pair(&key.private_key, &key.public_key, &key.key_id)?;
        self.key_store = Some(key_store);
        Ok(self)
    }

    /// Mirror signed evidence into `workspace`.
    pub fn with_workspace_store(mut self, workspace: Arc<dyn WorkspaceStore>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    pub fn key_store(&self) -> Option<&Arc<KeyStore>> {
        self.key_store.as_ref()
    }

    pub fn state(&self) -> CollectorState {
        if self.subscriptions.lock().is_empty() {
            CollectorState::Idle
        } else {
            CollectorState::Collecting
        }
    }

    /// Subscribe to the four inbound event categories.
    pub fn start_collecting(self: &Arc<Self>) {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            tracing::warn!("Evidence collection already started");
            return;
        }

        for kind in InboundKind::ALL {
            let handler = Arc::new(CollectorHandler {
                collector: Arc::downgrade(self),
                kind,
            });
            subscriptions.push(self.bus.subscribe(kind.event_name(), handler));
        }
        tracing::info!(subscriptions = subscriptions.len(), "Evidence collection started");
    }

    /// Remove every handler registered by [`start_collecting`](Self::start_collecting).
    pub fn stop_collecting(&self) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.is_empty() {
            return;
        }

        for id in subscriptions.drain(..) {
            if !self.bus.unsubscribe(id) {
                tracing::warn!(subscription = %id, "Subscription was already removed from the bus");
            }
        }
        tracing::info!("Evidence collection stopped");
    }

    /// Record an agent's output.
    pub async fn collect_from_agent_output(
        &self,
        agent_id: &str,
        output: Value,
        context: AgentOutputContext,
    ) -> Result<SignedEvidence, EvidenceError> {
        let mut evidence = Evidence::new(
            generate_evidence_id("agent", agent_id),
            EvidenceType::AgentOutput,
            format!("agent:{agent_id}"),
            context.project_id,
            output,
        )
        .with_metadata("agentId", agent_id);

        if let Some(task_id) = context.task_id {
            evidence = evidence.with_metadata("taskId", task_id);
        }
        if let Some(role) = context.agent_role {
            evidence = evidence.with_metadata("agentRole", role);
        }
        self.collect_and_store(evidence).await
    }

    /// Record a completed task.
    pub async fn collect_from_task_completion(
        &self,
        task_id: &str,
        result: Value,
        project_id: &str,
    ) -> Result<SignedEvidence, EvidenceError> {
        let evidence = Evidence::new(
            generate_evidence_id("task", task_id),
            EvidenceType::TaskCompletion,
            "task-executor",
            project_id,
            result,
        )
        .with_metadata("taskId", task_id);
        self.collect_and_store(evidence).await
    }

    /// Record a monitoring finding.
    pub async fn collect_from_finding(
        &self,
        finding: &Finding,
        project_id: &str,
    ) -> Result<SignedEvidence, EvidenceError> {
        let evidence = Evidence::new(
            generate_evidence_id("finding", &finding.id),
            EvidenceType::Finding,
            "monitoring",
            project_id,
            serde_json::to_value(finding)?,
        )
        .with_metadata("findingId", finding.id.as_str())
        .with_metadata("findingType", finding.finding_type.as_str())
        .with_metadata("severity", finding.severity.as_str());
        self.collect_and_store(evidence).await
    }

    /// Record a workflow state transition.
    pub async fn collect_from_state_transition(
        &self,
        transition: &StateTransition,
        project_id: &str,
    ) -> Result<SignedEvidence, EvidenceError> {
        let subject = format!("{}-{}", transition.from_state, transition.to_state);
        let evidence = Evidence::new(
            generate_evidence_id("transition", &subject),
            EvidenceType::StateTransition,
            "state-machine",
            project_id,
            serde_json::to_value(transition)?,
        )
        .with_metadata("fromState", transition.from_state.as_str())
        .with_metadata("toState", transition.to_state.as_str());
        self.collect_and_store(evidence).await
    }

    /// Sign, index, mirror, and announce `evidence`.
    ///
    /// Ids are immutable once indexed; resubmitting an id is an error.
    pub async fn collect_and_store(
        &self,
        evidence: Evidence,
    ) -> Result<SignedEvidence, EvidenceError> {
        if self.index.read().contains_key(&evidence.id) {
            return Err(EvidenceError::Duplicate(evidence.id));
        }

        let signed = self
            .signer
            .lock()
            .sign_evidence(evidence, self.config.signer_identity())?;

        {
            let mut index = self.index.write();
            if index.contains_key(signed.id()) {
                return Err(EvidenceError::Duplicate(signed.id().to_string()));
            }
            index.insert(signed.id().to_string(), signed.clone());
        }

        tracing::debug!(
            evidence_id = %signed.id(),
            evidence_type = %signed.evidence_type(),
            project_id = %signed.project_id(),
            "Evidence collected"
        );

        self.mirror(&signed).await;

        let notification = EvidenceCollectedEvent {
            evidence_id: signed.id().to_string(),
            evidence_type: signed.evidence_type(),
            project_id: signed.project_id().to_string(),
            timestamp: signed.timestamp(),
        };
        match serde_json::to_value(&notification) {
            Ok(payload) => self.bus.publish(names::EVIDENCE_COLLECTED, payload).await,
            Err(e) => tracing::warn!(error = %e, "Failed to encode evidence notification"),
        }

        Ok(signed)
    }

    async fn mirror(&self, signed: &SignedEvidence) {
        if !self.config.mirror_to_workspace() {
            return;
        }
        let Some(workspace) = &self.workspace else {
            return;
        };
        if !is_path_safe(signed.id()) {
            tracing::warn!(evidence_id = %signed.id(), "Evidence id is not a safe artifact name; not mirrored");
            return;
        }

        let workspaces = match workspace.get_workspaces_for_project(signed.project_id()).await {
            Ok(workspaces) => workspaces,
            Err(e) => {
                tracing::warn!(evidence_id = %signed.id(), error = %e, "Failed to look up workspaces for evidence mirror");
                return;
            }
        };
        let Some(target) = workspaces.iter().find(|w| w.is_active()) else {
            tracing::debug!(project_id = %signed.project_id(), "No active workspace to mirror evidence into");
            return;
        };

        let content = match serde_json::to_string_pretty(signed) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(evidence_id = %signed.id(), error = %e, "Failed to encode evidence for mirror");
                return;
            }
        };
        let path = format!(
            "{}/{}/{}.json",
            self.config.mirror_path_prefix(),
            signed.evidence_type(),
            signed.id()
        );
        let options = ArtifactUpdateOptions {
            message: Some(format!("Signed evidence {}", signed.id())),
            content_type: Some("application/json".to_string()),
        };

        if let Err(e) = workspace
            .update_artifact(
                &target.id,
                &path,
                &content,
                self.config.signer_identity(),
                MIRROR_SOURCE,
                options,
            )
            .await
        {
            tracing::warn!(
                evidence_id = %signed.id(),
                workspace_id = %target.id,
                error = %e,
                "Failed to mirror evidence to workspace"
            );
        }
    }

    pub fn get_evidence(&self, id: &str) -> Option<SignedEvidence> {
        self.index.read().get(id).cloned()
    }

    /// Evidence for `project_id`, oldest first.
    pub fn get_evidence_for_project(&self, project_id: &str) -> Vec<SignedEvidence> {
        self.select(|e| e.project_id() == project_id)
    }

    /// Evidence relevant to a compliance `framework`, oldest first.
    ///
    /// Includes every compliance-relevant type, plus anything whose
    /// `compliance` metadata tag (comma separated) names the framework.
    pub fn get_evidence_for_compliance(&self, framework: &str) -> Vec<SignedEvidence> {
        self.select(|e| {
            e.evidence_type().is_compliance_relevant()
                || e.evidence.metadata.get("compliance").is_some_and(|tags| {
                    tags.split(',')
                        .any(|tag| tag.trim().eq_ignore_ascii_case(framework))
                })
        })
    }

    fn select<F>(&self, predicate: F) -> Vec<SignedEvidence>
    where
        F: Fn(&SignedEvidence) -> bool,
    {
        let mut selected: Vec<SignedEvidence> = self
            .index
            .read()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        sort_chronologically(&mut selected);
        selected
    }

    /// Export every indexed record matching `filter` as a signed package.
    ///
    /// Fails with [`EvidenceError::PackageSigningUnavailable`] when no key
    /// store is wired in or it has no active key; an unsigned package is
    /// never produced.
    pub async fn export_evidence_package(
        &self,
        filter: EvidenceFilter,
    ) -> Result<EvidencePackage, EvidenceError> {
        let package_id = format!("package-{}", Uuid::new_v4());
        let created_at = now_millis();
        let evidence = self.select(|e| filter.matches(e));

        let mut manifest = EvidenceManifest {
            package_id: package_id.clone(),
            created_at,
            total_evidence: evidence.len(),
            evidence_ids: evidence.iter().map(|e| e.id().to_string()).collect(),
            filters: filter.clone(),
            signatures: ManifestSignatures {
                evidence_signatures: evidence
                    .iter()
                    .map(|e| (e.id().to_string(), e.signature.clone()))
                    .collect(),
                package_signature: String::new(),
            },
        };

        let hash = manifest.signing_hash().map_err(|e| {
            audit::log_package_export_failed(&package_id, &e.to_string());
            e
        })?;

        let signed = self
            .key_store
            .as_ref()
            .and_then(|store| store.sign_payload(&hash))
            .ok_or_else(|| {
                let err = EvidenceError::PackageSigningUnavailable;
                audit::log_package_export_failed(&package_id, &err.to_string());
                err
            })?;

        let package_signature = format!("{}:{}", signed.key_id, signed.signature);
        manifest.signatures.package_signature = package_signature.clone();

        let package = EvidencePackage {
            id: package_id,
            created_at,
            evidence,
            manifest,
            signature: package_signature,
        };

        audit::log_package_exported(&package.id, package.evidence.len(), &signed.key_id);

        let notification = PackageExportedEvent {
            package_id: package.id.clone(),
            evidence_count: package.evidence.len(),
            filters: filter,
            timestamp: created_at,
        };
        match serde_json::to_value(&notification) {
            Ok(payload) => {
                self.bus
                    .publish(names::EVIDENCE_PACKAGE_EXPORTED, payload)
                    .await
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode package notification"),
        }

        Ok(package)
    }

    /// Verify one indexed record against the key that signed it.
    pub fn verify_evidence(&self, id: &str) -> bool {
        let Some(record) = self.get_evidence(id) else {
            return false;
        };
        let local = self.local_key();
        self.check_record(&record, &local).is_ok()
    }

    /// Verify every indexed record and compute the chain hash.
    pub fn verify_evidence_chain(&self) -> IntegrityReport {
        let local = self.local_key();
        let index = self.index.read();

        let mut details = Vec::with_capacity(index.len());
        let mut valid = 0;
        let mut invalid = 0;
        let mut missing = 0;

        let mut ids: Vec<&String> = index.keys().collect();
        ids.sort();

        for slot in ids {
            let record = &index[slot];
            if record.id() != slot.as_str() {
                missing += 1;
                details.push(IntegrityDetail {
                    evidence_id: slot.clone(),
                    valid: false,
                    key_id: record.key_id.clone(),
                    reason: Some(format!("index slot holds evidence {}", record.id())),
                });
                continue;
            }

            match self.check_record(record, &local) {
                Ok(()) => {
                    valid += 1;
                    details.push(IntegrityDetail {
                        evidence_id: slot.clone(),
                        valid: true,
                        key_id: record.key_id.clone(),
                        reason: None,
                    });
                }
                Err(reason) => {
                    invalid += 1;
                    details.push(IntegrityDetail {
                        evidence_id: slot.clone(),
                        valid: false,
                        key_id: record.key_id.clone(),
                        reason: Some(reason),
                    });
                }
            }
        }

        let records: Vec<&SignedEvidence> = index.values().collect();
        let mode = self.config.chain_hash_mode();
        let chain_hash = compute_chain_hash(&records, mode);

        audit::log_chain_verified(index.len(), invalid, missing, &chain_hash);

        IntegrityReport {
            total_evidence: index.len(),
            valid_signatures: valid,
            invalid_signatures: invalid,
            missing_evidence: missing,
            chain_hash,
            chain_algorithm: mode.algorithm().to_string(),
            is_valid: invalid == 0 && missing == 0,
            details,
        }
    }

    /// The signer's key id and public key, captured once per audit.
    fn local_key(&self) -> Option<(String, String)> {
        let signer = self.signer.lock();
        match (signer.key_id(), signer.export_public_key()) {
            (Some(id), Some(pem)) => Some((id.to_string(), pem.to_string())),
            _ => None,
        }
    }

    /// Resolve the historical key for `record` and verify it.
    fn check_record(
        &self,
        record: &SignedEvidence,
        local: &Option<(String, String)>,
    ) -> Result<(), String> {
        let pem = self
            .key_store
            .as_ref()
            .and_then(|store| store.resolve_public_key(&record.key_id))
            .or_else(|| {
                local
                    .as_ref()
                    .filter(|(id, _)| id == &record.key_id)
                    .map(|(_, pem)| pem.clone())
            })
            .ok_or_else(|| {
                audit::log_evidence_verification_failure(
                    record.id(),
                    "unknown_signing_key",
                    Some(&record.key_id),
                );
                format!("unknown signing key {}", record.key_id)
            })?;

        let public_key = decode_public_key_pem(&pem).map_err(|e| e.to_string())?;
        if verify_with_key(record, &public_key) {
            Ok(())
        } else {
            Err("signature or content hash mismatch".to_string())
        }
    }

    /// Rotate the key store's signing key and start signing with it.
    ///
    /// Evidence signed before the rotation keeps verifying through the
    /// retired key, which the key store retains.
    pub fn rotate_signing_key(&self) -> Result<String, EvidenceError> {
        let store = self
            .key_store
            .as_ref()
            .ok_or(EvidenceError::KeyStoreUnavailable)?;
        let key = store.rotate_key()?;
        self.signer
            .lock()
            .import_key_pair(&key.private_key, &key.public_key, &key.key_id)?;
        Ok(key.key_id)
    }

    pub fn get_status(&self) -> CollectorStatus {
        let index = self.index.read();
        let mut by_type = BTreeMap::new();
        for record in index.values() {
            *by_type
                .entry(record.evidence_type().as_str().to_string())
                .or_insert(0) += 1;
        }

        CollectorStatus {
            state: self.state(),
            evidence_count: index.len(),
            active_subscriptions: self.subscriptions.lock().len(),
            key_id: self.signer.lock().key_id().map(str::to_string),
            by_type,
        }
    }

    /// Drop all indexed evidence and subscriptions. For test harnesses.
    pub fn clear(&self) {
        self.stop_collecting();
        self.index.write().clear();
    }

    async fn handle_event(&self, kind: InboundKind, payload: &Value) -> Result<(), EvidenceError> {
        match kind {
            InboundKind::AgentOutput => {
                let event: AgentOutputEvent = serde_json::from_value(payload.clone())?;
                let Some(project_id) = event.project_id else {
                    skip(kind);
                    return Ok(());
                };
                let context = AgentOutputContext {
                    project_id,
                    task_id: event.task_id,
                    agent_role: event.agent_role,
                };
                self.collect_from_agent_output(&event.agent_id, event.result, context)
                    .await?;
            }
            InboundKind::TaskCompleted => {
                let event: TaskCompletedEvent = serde_json::from_value(payload.clone())?;
                let Some(project_id) = event.project_id else {
                    skip(kind);
                    return Ok(());
                };
                self.collect_from_task_completion(&event.task_id, event.result, &project_id)
                    .await?;
            }
            InboundKind::Finding => {
                let event: FindingEvent = serde_json::from_value(payload.clone())?;
                let Some(project_id) = event.project_id else {
                    skip(kind);
                    return Ok(());
                };
                self.collect_from_finding(&event.finding, &project_id).await?;
            }
            InboundKind::StateTransition => {
                let event: StateTransitionEvent = serde_json::from_value(payload.clone())?;
                let Some(project_id) = event.project_id else {
                    skip(kind);
                    return Ok(());
                };
                self.collect_from_state_transition(&event.transition, &project_id)
                    .await?;
            }
        }
        Ok(())
    }
}

fn skip(kind: InboundKind) {
    tracing::debug!(event = %kind.event_name(), "Event has no projectId; not collected");
}

fn sort_chronologically(records: &mut [SignedEvidence]) {
    records.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.id().cmp(b.id()))
    });
}

/// `evidence-<kind>-<subject>-<millis>-<suffix>`
///
/// `subject` comes from event payloads, so path separators and `..` are
/// replaced before it becomes part of an artifact name.
fn generate_evidence_id(kind: &str, subject: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    let subject = subject.replace(['/', '\\'], "_").replace("..", "_");
    format!(
        "evidence-{kind}-{subject}-{}-{}",
        now_millis().timestamp_millis(),
        &uuid[..8]
    )
}

/// Whether `id` can be used as a single artifact file name.
fn is_path_safe(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && !id.contains("..")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundKind {
    AgentOutput,
    TaskCompleted,
    Finding,
    StateTransition,
}

impl InboundKind {
    const ALL: [InboundKind; 4] = [
        InboundKind::AgentOutput,
        InboundKind::TaskCompleted,
        InboundKind::Finding,
        InboundKind::StateTransition,
    ];

    fn event_name(&self) -> &'static str {
        match self {
            InboundKind::AgentOutput => names::AGENT_OUTPUT_COMPLETE,
            InboundKind::TaskCompleted => names::TASK_COMPLETED,
            InboundKind::Finding => names::MONITORING_FINDING,
            InboundKind::StateTransition => names::STATE_TRANSITION,
        }
    }
}

/// Bus handler for one inbound event kind. Holds the collector weakly so the
/// bus never keeps a dropped collector alive.
struct CollectorHandler {
    collector: Weak<EvidenceCollector>,
    kind: InboundKind,
}

#[async_trait]
impl EventHandler for CollectorHandler {
    async fn handle(&self, event: &str, payload: &Value) {
        let Some(collector) = self.collector.upgrade() else {
            return;
        };
        if let Err(e) = collector.handle_event(self.kind, payload).await {
            tracing::warn!(event = %event, error = %e, "Failed to collect evidence from event");
        }
    }
}
