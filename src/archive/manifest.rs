// Copyright 2020 Alex Dukhno
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `manifest.json` carried alongside every packed archive: one entry
//! per file with its digest, size, and mode, plus package-level metadata,
//! per `spec.md` §4.8.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One file's record within a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the archive root, using `/` separators.
    pub path: String,
    /// Hex-encoded SHA-256 digest of the file's contents.
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
    /// Unix permission bits, or `0o644` on platforms without a concept of
    /// file mode.
    pub mode: u32,
}

/// Package-level metadata carried in every manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// A human-assigned name for the packed tree.
    pub name: String,
    /// A free-form version string.
    pub version: String,
}

/// The full manifest written as `manifest.json` inside a packed archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package-level metadata.
    pub package: PackageMetadata,
    /// One entry per packed file, in pack order.
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Looks up the manifest entry for `path`, if one exists.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }

    /// Serializes this manifest as pretty-printed JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|err| GatewayError::io(err.to_string()))
    }

    /// Parses a manifest from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| GatewayError::io(err.to_string()))
    }
}

/// Computes the hex-encoded SHA-256 digest of `contents`.
pub fn digest_hex(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}
