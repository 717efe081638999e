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

//! Extracts a packed archive, sanitizing every entry path and verifying
//! its contents against the embedded manifest before the extraction is
//! considered complete, per `spec.md` §4.8. Synchronous; callers on the
//! async path run this through `blocking::unblock`.

use crate::archive::manifest::{digest_hex, Manifest};
use crate::archive::sanitize::sanitize_entry_path;
use crate::error::{GatewayError, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;
use tar::Archive;

/// Extracts `archive_bytes` under `destination_dir`, verifying every
/// extracted file's SHA-256 digest against `manifest.json`. Returns the
/// parsed manifest on success; no partially-verified file is left behind
/// on failure is not guaranteed (files already written before a mismatch
/// is discovered remain), matching a best-effort unpack rather than an
/// all-or-nothing transaction.
pub fn unpack_archive(archive_bytes: &[u8], destination_dir: &Path) -> Result<Manifest> {
    let decoder = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(decoder);

    let mut manifest: Option<Manifest> = None;
    let mut extracted: Vec<(String, Vec<u8>)> = Vec::new();

    for entry in archive.entries().map_err(|err| GatewayError::io(err.to_string()))? {
        let mut entry = entry.map_err(|err| GatewayError::io(err.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|err| GatewayError::io(err.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");

        if entry_path == "manifest.json" {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            manifest = Some(Manifest::from_json(&contents)?);
            continue;
        }

        let safe_relative = sanitize_entry_path(&entry_path)?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        extracted.push((safe_relative.to_string_lossy().replace('\\', "/"), contents));
    }

    let manifest = manifest.ok_or_else(GatewayError::empty_path)?;

    for (path, contents) in &extracted {
        let entry = manifest
            .entry(path)
            .ok_or_else(|| GatewayError::checksum_mismatch(path.clone()))?;
        if digest_hex(contents) != entry.sha256 {
            return Err(GatewayError::checksum_mismatch(path.clone()));
        }
    }

    fs::create_dir_all(destination_dir)?;
    for (path, contents) in &extracted {
        let target = destination_dir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)?;
    }

    Ok(manifest)
}
