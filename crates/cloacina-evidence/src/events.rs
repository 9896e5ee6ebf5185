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

//! # Event Bus
//!
//! The orchestration engine delivers notifications through an [`EventBus`].
//! The evidence collector subscribes to four inbound event names and
//! publishes two outbound ones. [`LocalEventBus`] is an in-process
//! implementation that runs handlers sequentially and isolates each one, so
//! a panicking handler is logged and the remaining handlers still run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

use crate::evidence::{EvidenceFilter, EvidenceType};

/// Event names exchanged with the orchestration engine.
pub mod names {
    /// An agent finished producing output.
    pub const AGENT_OUTPUT_COMPLETE: &str = "agent:output_complete";
    /// A task finished.
    pub const TASK_COMPLETED: &str = "task:completed";
    /// Monitoring raised a finding.
    pub const MONITORING_FINDING: &str = "monitoring:finding";
    /// A workflow state machine changed state.
    pub const STATE_TRANSITION: &str = "state:transition";

    /// Published after evidence is signed and indexed.
    pub const EVIDENCE_COLLECTED: &str = "evidence:collected";
    /// Published after a package export.
    pub const EVIDENCE_PACKAGE_EXPORTED: &str = "evidence:package_exported";
}

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Receives published events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &str, payload: &Value);
}

/// Publish/subscribe interface of the host event bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register `handler` for `event`.
    fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId;

    /// Remove a handler. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Deliver `payload` to every handler registered for `event`.
    async fn publish(&self, event: &str, payload: Value);
}

type HandlerList = Vec<(SubscriptionId, Arc<dyn EventHandler>)>;

/// In-process [`EventBus`].
#[derive(Default)]
pub struct LocalEventBus {
    handlers: RwLock<HashMap<String, HandlerList>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Number of handlers registered across all events.
    pub fn total_subscribers(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        tracing::debug!(event = %event, subscription = %id, "Handler subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    async fn publish(&self, event: &str, payload: Value) {
        let targets: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in targets {
            let outcome = AssertUnwindSafe(handler.handle(event, &payload))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                tracing::error!(event = %event, "Event handler panicked; continuing with remaining handlers");
            }
        }
    }
}

/// Payload of [`names::AGENT_OUTPUT_COMPLETE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutputEvent {
    pub agent_id: String,
    pub result: Value,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
}

/// Payload of [`names::TASK_COMPLETED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletedEvent {
    pub task_id: String,
    pub result: Value,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// A monitoring finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
}

/// Payload of [`names::MONITORING_FINDING`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingEvent {
    #[serde(flatten)]
    pub finding: Finding,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// A workflow state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from_state: String,
    pub to_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Payload of [`names::STATE_TRANSITION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionEvent {
    #[serde(flatten)]
    pub transition: StateTransition,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Payload of [`names::EVIDENCE_COLLECTED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceCollectedEvent {
    pub evidence_id: String,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of [`names::EVIDENCE_PACKAGE_EXPORTED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageExportedEvent {
    pub package_id: String,
    pub evidence_count: usize,
    pub filters: EvidenceFilter,
    pub timestamp: DateTime<Utc>,
}
