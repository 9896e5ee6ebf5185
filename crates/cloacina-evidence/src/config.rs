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

//! Configuration for the evidence subsystem.
//!
//! Use [`EvidenceConfig::builder()`] to create a configuration:
//!
//! ```rust,ignore
//! let config = EvidenceConfig::builder()
//!     .key_store_dir("/var/lib/cloacina/evidence-keys")
//!     .signer_identity("orchestrator-01")
//!     .build();
//! ```
//!
//! Or load one from TOML with [`EvidenceConfig::from_toml_file`]. Fields
//! missing from the file keep their defaults.

use crate::evidence::ChainHashMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the default key store directory.
pub const KEY_DIR_ENV: &str = "CLOACINA_EVIDENCE_KEY_DIR";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for key storage, signing identity, and auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct EvidenceConfig {
    key_store_dir: PathBuf,
    signer_identity: String,
    chain_hash_mode: ChainHashMode,
    mirror_to_workspace: bool,
    mirror_path_prefix: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EvidenceConfigFile {
    key_store_dir: Option<PathBuf>,
    signer_identity: Option<String>,
    chain_hash_mode: Option<ChainHashMode>,
    mirror_to_workspace: Option<bool>,
    mirror_path_prefix: Option<String>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            key_store_dir: default_key_store_dir(),
            signer_identity: "evidence-collector".to_string(),
            chain_hash_mode: ChainHashMode::default(),
            mirror_to_workspace: true,
            mirror_path_prefix: "evidence".to_string(),
        }
    }
}

impl EvidenceConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> EvidenceConfigBuilder {
        EvidenceConfigBuilder::default()
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: EvidenceConfigFile = toml::from_str(contents)?;
        let mut config = Self::default();

        if let Some(dir) = file.key_store_dir {
            config.key_store_dir = dir;
        }
        if let Some(identity) = file.signer_identity {
            config.signer_identity = identity;
        }
        if let Some(mode) = file.chain_hash_mode {
            config.chain_hash_mode = mode;
        }
        if let Some(mirror) = file.mirror_to_workspace {
            config.mirror_to_workspace = mirror;
        }
        if let Some(prefix) = file.mirror_path_prefix {
            config.mirror_path_prefix = prefix;
        }
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loading evidence config from {:?}", path);
        Self::from_toml_str(&contents)
    }

    /// Directory holding the key manifest and public key records.
    pub fn key_store_dir(&self) -> &Path {
        &self.key_store_dir
    }

    /// Identity recorded as `signedBy` on collected evidence.
    pub fn signer_identity(&self) -> &str {
        &self.signer_identity
    }

    /// Chain hash scheme used by integrity audits.
    pub fn chain_hash_mode(&self) -> ChainHashMode {
        self.chain_hash_mode
    }

    /// Whether signed evidence is mirrored into workspace storage.
    pub fn mirror_to_workspace(&self) -> bool {
        self.mirror_to_workspace
    }

    /// Artifact path prefix for mirrored evidence.
    pub fn mirror_path_prefix(&self) -> &str {
        &self.mirror_path_prefix
    }
}

/// Builder for [`EvidenceConfig`].
#[derive(Debug, Clone, Default)]
pub struct EvidenceConfigBuilder {
    config: EvidenceConfig,
}

impl EvidenceConfigBuilder {
    /// Sets the key store directory.
    pub fn key_store_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.config.key_store_dir = value.into();
        self
    }

    /// Sets the signer identity.
    pub fn signer_identity(mut self, value: impl Into<String>) -> Self {
        self.config.signer_identity = value.into();
        self
    }

    /// Sets the chain hash scheme.
    pub fn chain_hash_mode(mut self, value: ChainHashMode) -> Self {
        self.config.chain_hash_mode = value;
        self
    }

    /// Enables or disables workspace mirroring.
    pub fn mirror_to_workspace(mut self, value: bool) -> Self {
        self.config.mirror_to_workspace = value;
        self
    }

    /// Sets the artifact path prefix for mirrored evidence.
    pub fn mirror_path_prefix(mut self, value: impl Into<String>) -> Self {
        self.config.mirror_path_prefix = value.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> EvidenceConfig {
        self.config
    }
}

/// Default key store location: `$CLOACINA_EVIDENCE_KEY_DIR`, else the
/// platform data directory, else a dot-directory under the working directory.
pub fn default_key_store_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(KEY_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    match dirs::data_dir() {
        Some(dir) => dir.join("cloacina").join("evidence-keys"),
        None => PathBuf::from(".cloacina").join("evidence-keys"),
    }
}
