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

//! Durable workspace storage used to mirror signed evidence.
//!
//! The collaborative workspace store lives outside this crate. The collector
//! only needs to find a project's workspaces and write an artifact into one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a workspace store.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Workspace store unavailable: {0}")]
    Unavailable(String),

    #[error("Artifact write rejected: {0}")]
    Rejected(String),
}

/// Status value of a workspace that accepts writes.
pub const ACTIVE_STATUS: &str = "active";

/// A workspace belonging to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub id: String,
    pub status: String,
}

impl WorkspaceRef {
    pub fn is_active(&self) -> bool {
        self.status == ACTIVE_STATUS
    }
}

/// Options passed with an artifact update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactUpdateOptions {
    /// Human-readable change description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Content type of the artifact body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Interface of the external workspace/artifact store.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get_workspaces_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<WorkspaceRef>, WorkspaceError>;

    async fn update_artifact(
        &self,
        workspace_id: &str,
        path: &str,
        content: &str,
        actor: &str,
        source: &str,
        options: ArtifactUpdateOptions,
    ) -> Result<(), WorkspaceError>;
}
