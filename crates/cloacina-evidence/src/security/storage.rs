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

//! Secure scoped storage for key material.
//!
//! Permission tightening is platform specific. [`SecureStorage`] hides it
//! behind a capability: on unix directories are created `0o700` and files
//! `0o600`; on platforms without equivalent primitives the restriction is a
//! no-op and only the write itself happens.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Capability for writing files that only the current user may read.
pub trait SecureStorage: Send + Sync {
    /// Create `path` (and parents) with owner-only access.
    fn create_private_dir(&self, path: &Path) -> io::Result<()>;

    /// Atomically replace `path` with `contents`, readable by the owner only.
    fn write_private_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// [`SecureStorage`] backed by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformSecureStorage;

impl SecureStorage for PlatformSecureStorage {
    fn create_private_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)?;
        restrict_dir(path)
    }

    fn write_private_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
        fs::create_dir_all(parent)?;

        let tmp = path.with_extension("tmp");
        {
            let mut file = open_private(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        restrict_file(path)
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> io::Result<()> {
    Ok(())
}
