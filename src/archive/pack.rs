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

//! Packs a directory tree into a gzip-compressed tar archive carrying a
//! `manifest.json` of per-file digests, per `spec.md` §4.8. Synchronous;
//! callers on the async path run this through `blocking::unblock`.

use crate::archive::manifest::{digest_hex, Manifest, ManifestEntry, PackageMetadata};
use crate::config::ArchiveConfig;
use crate::error::{GatewayError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::Path;
use tar::{Builder, Header};

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn is_excluded_dir(name: &str, config: &ArchiveConfig) -> bool {
    config.excluded_dir_names.iter().any(|excluded| excluded == name)
}

fn is_excluded_extension(path: &Path, config: &ArchiveConfig) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => config.data_extensions.iter().any(|excluded| excluded == ext),
        None => false,
    }
}

fn walk(root: &Path, current: &Path, config: &ArchiveConfig, exclude_data: bool, out: &mut Vec<(String, std::path::PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if is_excluded_dir(&name, config) {
                continue;
            }
            walk(root, &path, config, exclude_data, out)?;
        } else if file_type.is_file() {
            if exclude_data && is_excluded_extension(&path, config) {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map_err(|_| GatewayError::io("path escaped archive root during walk"))?;
            out.push((relative.to_string_lossy().replace('\\', "/"), path));
        }
    }
    Ok(())
}

/// Packs every file under `source_dir` (excluding configured directory
/// names, and data-file extensions when `exclude_data` is set) into a
/// gzip-compressed tar archive with an embedded `manifest.json`.
pub fn pack_directory(
    source_dir: &Path,
    package: PackageMetadata,
    config: &ArchiveConfig,
    exclude_data: bool,
) -> Result<Vec<u8>> {
    let mut files = Vec::new();
    walk(source_dir, source_dir, config, exclude_data, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut manifest_entries = Vec::with_capacity(files.len());
    let mut total_size: u64 = 0;
    for (relative, absolute) in &files {
        let contents = fs::read(absolute)?;
        let metadata = fs::metadata(absolute)?;
        total_size += contents.len() as u64;
        if total_size > config.max_archive_size_bytes {
            return Err(GatewayError::size_limit_exceeded(config.max_archive_size_bytes));
        }
        manifest_entries.push(ManifestEntry {
            path: relative.clone(),
            sha256: digest_hex(&contents),
            size: contents.len() as u64,
            mode: file_mode(&metadata),
        });
    }

    let manifest = Manifest {
        package,
        files: manifest_entries,
    };
    let manifest_json = manifest.to_json()?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    let mut manifest_header = Header::new_gnu();
    manifest_header.set_size(manifest_json.len() as u64);
    manifest_header.set_mode(0o644);
    manifest_header.set_cksum();
    builder
        .append_data(&mut manifest_header, "manifest.json", manifest_json.as_slice())
        .map_err(|err| GatewayError::io(err.to_string()))?;

    for (relative, absolute) in &files {
        let contents = fs::read(absolute)?;
        let metadata = fs::metadata(absolute)?;
        let mut header = Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(file_mode(&metadata));
        header.set_cksum();
        builder
            .append_data(&mut header, relative, contents.as_slice())
            .map_err(|err| GatewayError::io(err.to_string()))?;
    }

    let encoder = builder.into_inner().map_err(|err| GatewayError::io(err.to_string()))?;
    encoder.finish().map_err(|err| GatewayError::io(err.to_string()))
}
