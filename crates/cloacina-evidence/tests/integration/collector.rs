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

//! Event-driven collection tests.
//!
//! These tests drive the collector through the event bus the way the
//! orchestration system does, then inspect the index, the mirror, and the
//! audit report.

use crate::fixtures::{finding, new_context, PanickingHandler, RecordingHandler, RecordingWorkspace};
use cloacina_evidence::events::{names, StateTransition};
use cloacina_evidence::workspace::WorkspaceStore;
use cloacina_evidence::{
    AgentOutputContext, CollectorState, EventBus, Evidence, EvidenceType, SignedEvidence,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_finding_event_becomes_signed_evidence() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);

    bus.publish(
        names::MONITORING_FINDING,
        json!({
            "id": "f1",
            "type": "vuln",
            "severity": "high",
            "title": "X",
            "description": "Y",
            "projectId": "proj-1"
        }),
    )
    .await;

    let evidence = context.collector().get_evidence_for_project("proj-1");
    assert_eq!(evidence.len(), 1);
    let record = &evidence[0];
    assert!(record.id().starts_with("evidence-finding-f1"));
    assert_eq!(record.evidence_type(), EvidenceType::Finding);
    assert_eq!(record.evidence.source, "monitoring");
    assert_eq!(record.evidence.metadata["severity"], "high");
    assert_eq!(record.evidence.content["title"], "X");
    assert_eq!(record.signed_by, "test-collector");
    assert!(context.collector().verify_evidence(record.id()));
}

#[tokio::test]
async fn test_each_inbound_event_is_collected() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);

    bus.publish(
        names::AGENT_OUTPUT_COMPLETE,
        json!({
            "agentId": "a1",
            "result": {"summary": "ok"},
            "projectId": "proj-1",
            "taskId": "t1",
            "agentRole": "reviewer"
        }),
    )
    .await;
    bus.publish(
        names::TASK_COMPLETED,
        json!({"taskId": "t1", "result": "done", "projectId": "proj-1"}),
    )
    .await;
    bus.publish(
        names::STATE_TRANSITION,
        json!({"fromState": "draft", "toState": "review", "projectId": "proj-1"}),
    )
    .await;

    let status = context.collector().get_status();
    assert_eq!(status.evidence_count, 3);
    assert_eq!(status.by_type["agent_output"], 1);
    assert_eq!(status.by_type["task_completion"], 1);
    assert_eq!(status.by_type["state_transition"], 1);

    let evidence = context.collector().get_evidence_for_project("proj-1");
    let agent = evidence
        .iter()
        .find(|e| e.evidence_type() == EvidenceType::AgentOutput)
        .unwrap();
    assert_eq!(agent.evidence.source, "agent:a1");
    assert_eq!(agent.evidence.metadata["agentRole"], "reviewer");
    assert_eq!(agent.evidence.metadata["taskId"], "t1");

    let transition = evidence
        .iter()
        .find(|e| e.evidence_type() == EvidenceType::StateTransition)
        .unwrap();
    assert_eq!(transition.evidence.source, "state-machine");
    assert_eq!(transition.evidence.metadata["toState"], "review");
}

#[tokio::test]
async fn test_events_without_project_are_ignored() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);

    bus.publish(names::TASK_COMPLETED, json!({"taskId": "t1", "result": "done"}))
        .await;
    bus.publish(names::MONITORING_FINDING, json!({"malformed": true}))
        .await;

    assert_eq!(context.collector().get_status().evidence_count, 0);
}

#[tokio::test]
async fn test_panicking_handler_does_not_block_collection() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);
    bus.subscribe(names::TASK_COMPLETED, Arc::new(PanickingHandler));

    bus.publish(
        names::TASK_COMPLETED,
        json!({"taskId": "t1", "result": "done", "projectId": "proj-1"}),
    )
    .await;

    assert_eq!(context.collector().get_status().evidence_count, 1);
}

#[tokio::test]
async fn test_stop_collecting_unsubscribes_everything() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);
    let collector = context.collector();
    assert_eq!(collector.state(), CollectorState::Collecting);

    collector.stop_collecting();
    collector.stop_collecting();

    assert_eq!(collector.state(), CollectorState::Idle);
    assert_eq!(bus.total_subscribers(), 0);

    bus.publish(
        names::TASK_COMPLETED,
        json!({"taskId": "t1", "result": "done", "projectId": "proj-1"}),
    )
    .await;
    assert_eq!(collector.get_status().evidence_count, 0);

    collector.start_collecting();
    collector.start_collecting();
    assert_eq!(bus.total_subscribers(), 4);
}

#[tokio::test]
async fn test_collected_notification_published() {
    let dir = TempDir::new().unwrap();
    let (context, bus) = new_context(&dir, None);
    let listener = Arc::new(RecordingHandler::default());
    bus.subscribe(names::EVIDENCE_COLLECTED, listener.clone());

    let signed = context
        .collector()
        .collect_from_finding(&finding("f1"), "proj-1")
        .await
        .unwrap();

    let received = listener.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1["evidenceId"], json!(signed.id()));
    assert_eq!(received[0].1["type"], json!("finding"));
    assert_eq!(received[0].1["projectId"], json!("proj-1"));
}

#[tokio::test]
async fn test_evidence_mirrored_to_active_workspace() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(RecordingWorkspace::with_workspaces(&[
        ("ws-archived", "archived"),
        ("ws-live", "active"),
    ]));
    let (context, _bus) = new_context(&dir, Some(workspace.clone() as Arc<dyn WorkspaceStore>));

    let signed = context
        .collector()
        .collect_from_finding(&finding("f1"), "proj-1")
        .await
        .unwrap();

    let writes = workspace.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].workspace_id, "ws-live");
    assert_eq!(writes[0].path, format!("evidence/finding/{}.json", signed.id()));
    assert_eq!(writes[0].actor, "test-collector");

    let mirrored: SignedEvidence = serde_json::from_str(&writes[0].content).unwrap();
    assert_eq!(mirrored, signed);
}

#[tokio::test]
async fn test_mirror_path_stays_under_prefix() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(RecordingWorkspace::with_workspaces(&[("ws-1", "active")]));
    let (context, bus) = new_context(&dir, Some(workspace.clone() as Arc<dyn WorkspaceStore>));

    bus.publish(
        names::MONITORING_FINDING,
        json!({
            "id": "../../../x",
            "type": "vuln",
            "severity": "high",
            "title": "X",
            "description": "Y",
            "projectId": "proj-1"
        }),
    )
    .await;

    assert_eq!(context.collector().get_status().evidence_count, 1);
    let writes = workspace.writes.lock();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].path.starts_with("evidence/finding/evidence-finding-"));
    assert!(!writes[0].path.contains(".."));
    assert_eq!(writes[0].path.matches('/').count(), 2);
}

#[tokio::test]
async fn test_unsafe_caller_id_is_collected_but_not_mirrored() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(RecordingWorkspace::with_workspaces(&[("ws-1", "active")]));
    let (context, _bus) = new_context(&dir, Some(workspace.clone() as Arc<dyn WorkspaceStore>));

    let signed = context
        .collector()
        .collect_and_store(Evidence::new(
            "../outside",
            EvidenceType::Approval,
            "reviewer",
            "proj-1",
            json!("approved"),
        ))
        .await
        .unwrap();

    assert!(context.collector().get_evidence(signed.id()).is_some());
    assert!(workspace.writes.lock().is_empty());
}

#[tokio::test]
async fn test_mirror_failure_does_not_fail_collection() {
    let dir = TempDir::new().unwrap();
    let workspace: Arc<dyn WorkspaceStore> = Arc::new(RecordingWorkspace::failing());
    let (context, _bus) = new_context(&dir, Some(workspace));

    let signed = context
        .collector()
        .collect_from_task_completion("t1", json!("done"), "proj-1")
        .await
        .unwrap();

    assert!(context.collector().get_evidence(signed.id()).is_some());
}

#[tokio::test]
async fn test_no_active_workspace_skips_mirror() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(RecordingWorkspace::with_workspaces(&[("ws-1", "archived")]));
    let (context, _bus) = new_context(&dir, Some(workspace.clone() as Arc<dyn WorkspaceStore>));

    context
        .collector()
        .collect_from_task_completion("t1", json!("done"), "proj-1")
        .await
        .unwrap();

    assert!(workspace.writes.lock().is_empty());
    assert_eq!(context.collector().get_status().evidence_count, 1);
}

#[tokio::test]
async fn test_compliance_query() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    let collector = context.collector();

    collector
        .collect_from_agent_output("a1", json!("draft"), AgentOutputContext::new("proj-1"))
        .await
        .unwrap();
    collector
        .collect_from_finding(&finding("f1"), "proj-1")
        .await
        .unwrap();
    let tagged = collector
        .collect_and_store(
            Evidence::new(
                "evidence-agent-tagged",
                EvidenceType::AgentOutput,
                "agent:a2",
                "proj-1",
                json!("reviewed output"),
            )
            .with_metadata("compliance", "soc2, iso27001"),
        )
        .await
        .unwrap();

    let soc2 = collector.get_evidence_for_compliance("soc2");
    assert_eq!(soc2.len(), 2);
    assert!(soc2.iter().any(|e| e.id() == tagged.id()));
    assert!(soc2.iter().any(|e| e.evidence_type() == EvidenceType::Finding));

    assert_eq!(collector.get_evidence_for_compliance("hipaa").len(), 1);
}

#[tokio::test]
async fn test_chain_report_for_clean_collection() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    let collector = context.collector();

    let empty = collector.verify_evidence_chain();
    assert!(empty.is_valid);
    assert_eq!(empty.total_evidence, 0);

    collector
        .collect_from_finding(&finding("f1"), "proj-1")
        .await
        .unwrap();
    collector
        .collect_from_state_transition(
            &StateTransition {
                from_state: "review".to_string(),
                to_state: "approved".to_string(),
                metadata: None,
            },
            "proj-1",
        )
        .await
        .unwrap();

    let report = collector.verify_evidence_chain();
    assert!(report.is_valid);
    assert_eq!(report.total_evidence, 2);
    assert_eq!(report.valid_signatures, 2);
    assert_eq!(report.invalid_signatures, 0);
    assert_eq!(report.missing_evidence, 0);
    assert_eq!(report.chain_algorithm, "sha256-cumulative-v1");
    assert_eq!(report.chain_hash.len(), 64);
    assert_ne!(report.chain_hash, empty.chain_hash);

    assert_eq!(collector.verify_evidence_chain().chain_hash, report.chain_hash);
}

#[tokio::test]
async fn test_rotation_keeps_old_evidence_verifiable() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);
    let collector = context.collector();

    let old = collector
        .collect_from_finding(&finding("f1"), "proj-1")
        .await
        .unwrap();
    let new_key = collector.rotate_signing_key().unwrap();
    let new = collector
        .collect_from_finding(&finding("f2"), "proj-1")
        .await
        .unwrap();

    assert_ne!(old.key_id, new.key_id);
    assert_eq!(new.key_id, new_key);
    assert_eq!(collector.get_status().key_id.as_deref(), Some(new_key.as_str()));
    assert!(collector.verify_evidence(old.id()));
    assert!(collector.verify_evidence(new.id()));

    let active: Vec<_> = context
        .key_store()
        .list_keys()
        .into_iter()
        .filter(|k| k.active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].key_id, new_key);

    let report = collector.verify_evidence_chain();
    assert!(report.is_valid);
    assert_eq!(report.valid_signatures, 2);
}

#[tokio::test]
async fn test_unknown_evidence_does_not_verify() {
    let dir = TempDir::new().unwrap();
    let (context, _bus) = new_context(&dir, None);

    assert!(!context.collector().verify_evidence("evidence-missing"));
    assert!(context.collector().get_evidence("evidence-missing").is_none());
}
