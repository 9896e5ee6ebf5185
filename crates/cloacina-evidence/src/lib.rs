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

//! # Cloacina Evidence
//!
//! Tamper-evident evidence for orchestrated agent workflows. Every agent
//! output, task completion, monitoring finding, and state transition observed
//! on the event bus becomes a signed, content-hashed record that can later be
//! exported as a signed package and verified offline.
//!
//! ## Components
//!
//! - [`KeyStore`]: durable RSA-2048 key lifecycle with a public audit trail
//! - [`EvidenceSigner`]: canonical content hashing and RSA-SHA256 signatures
//! - [`EvidenceCollector`]: event-driven capture, indexing, export, and audit
//! - [`EvidenceContext`]: wires the three together for one process
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use cloacina_evidence::{EvidenceConfig, EvidenceContext, EvidenceFilter, LocalEventBus};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(LocalEventBus::new());
//! let context = EvidenceContext::init(EvidenceConfig::default(), bus.clone(), None)?;
//!
//! // ... orchestration publishes events on `bus` ...
//!
//! let package = context
//!     .collector()
//!     .export_evidence_package(EvidenceFilter::default().project("proj-1"))
//!     .await?;
//! cloacina_evidence::verify_evidence_package(&package, context.key_store().as_ref())?;
//! ```

pub mod canonical;
pub mod config;
pub mod context;
pub mod crypto;
pub mod events;
pub mod evidence;
pub mod security;
pub mod workspace;

pub use config::{ConfigError, EvidenceConfig, EvidenceConfigBuilder};
pub use context::EvidenceContext;
pub use events::{EventBus, EventHandler, LocalEventBus, SubscriptionId};
pub use evidence::{
    verify_evidence_package, AgentOutputContext, ChainHashMode, CollectorState,
    CollectorStatus, Evidence, EvidenceCollector, EvidenceError, EvidenceFilter,
    EvidencePackage, EvidenceSigner, EvidenceType, IntegrityReport,
    PackageVerificationError, SignedEvidence,
};
pub use security::{KeyStore, KeyStoreError, PublicKeyResolver};
pub use workspace::{WorkspaceError, WorkspaceStore};
