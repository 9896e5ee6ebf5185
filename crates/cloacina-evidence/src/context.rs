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

//! # Evidence Context
//!
//! Wires the subsystem together once per process: a [`KeyStore`] rooted at the
//! configured directory, an [`EvidenceCollector`] signing with its active key,
//! and the collector's event subscriptions.
//!
//! The context is an ordinary value that callers construct and pass to the
//! components that need it. There is no global instance; tests build as many
//! isolated contexts as they like.
//!
//! ```rust,ignore
//! use cloacina_evidence::{EvidenceConfig, EvidenceContext, LocalEventBus};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(LocalEventBus::new());
//! let context = EvidenceContext::init(EvidenceConfig::default(), bus, None)?;
//! let report = context.collector().verify_evidence_chain();
//! context.shutdown();
//! ```

use crate::config::EvidenceConfig;
use crate::events::EventBus;
use crate::evidence::{EvidenceCollector, EvidenceError};
use crate::security::KeyStore;
use crate::workspace::WorkspaceStore;
use std::sync::Arc;

/// The assembled evidence subsystem.
#[derive(Debug, Clone)]
pub struct EvidenceContext {
    key_store: Arc<KeyStore>,
    collector: Arc<EvidenceCollector>,
}

impl EvidenceContext {
    /// Open the key store, bootstrap a signing key if none exists, and start
    /// collecting from `bus`.
    ///
    /// # Arguments
    ///
    /// * `config` - Subsystem configuration
    /// * `bus` - Event bus the collector subscribes to and publishes on
    /// * `workspace` - Optional workspace storage for evidence mirroring
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key cannot be generated, persisted, or
    /// loaded into the signer.
    pub fn init(
        config: EvidenceConfig,
        bus: Arc<dyn EventBus>,
        workspace: Option<Arc<dyn WorkspaceStore>>,
    ) -> Result<Self, EvidenceError> {
        let key_store = Arc::new(KeyStore::open(config.key_store_dir()));
        Self::with_key_store(config, bus, workspace, key_store)
    }

    /// Like [`init`](Self::init), with a caller-supplied key store.
    pub fn with_key_store(
        config: EvidenceConfig,
        bus: Arc<dyn EventBus>,
        workspace: Option<Arc<dyn WorkspaceStore>>,
        key_store: Arc<KeyStore>,
    ) -> Result<Self, EvidenceError> {
        let mut collector =
            EvidenceCollector::new(config, bus).with_key_store(key_store.clone())?;
        if let Some(workspace) = workspace {
            collector = collector.with_workspace_store(workspace);
        }

        let collector = Arc::new(collector);
        collector.start_collecting();

        tracing::info!(
            key_dir = %key_store.data_dir().display(),
            key_id = ?collector.get_status().key_id,
            "Evidence subsystem initialized"
        );

        Ok(Self {
            key_store,
            collector,
        })
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub fn collector(&self) -> &Arc<EvidenceCollector> {
        &self.collector
    }

    /// Unsubscribe from the event bus. Indexed evidence stays queryable.
    pub fn shutdown(&self) {
        self.collector.stop_collecting();
    }

    /// Drop all in-memory evidence and re-read the key manifest from disk.
    /// Collection is resumed afterwards.
    #[doc(hidden)]
    pub fn reset_for_tests(&self) {
        self.collector.clear();
        self.key_store.reload();
        self.collector.start_collecting();
    }
}
