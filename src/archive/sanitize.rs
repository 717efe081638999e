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

//! Validates archive entry names before they touch the filesystem, per
//! `spec.md` §4.8: no traversal, no absolute paths, no disallowed bytes, no
//! path longer than 255 bytes, no empty names.

use crate::error::{GatewayError, Result};
use std::path::{Component, Path, PathBuf};

const MAX_ENTRY_PATH_LEN: usize = 255;

/// Validates `entry_name` and returns the relative path it is safe to join
/// under an extraction root.
pub fn sanitize_entry_path(entry_name: &str) -> Result<PathBuf> {
    if entry_name.is_empty() {
        return Err(GatewayError::empty_path());
    }
    if entry_name.len() > MAX_ENTRY_PATH_LEN {
        return Err(GatewayError::path_too_long(entry_name));
    }
    if entry_name.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(GatewayError::suspicious_character(entry_name));
    }
    if entry_name.contains('\\') {
        return Err(GatewayError::suspicious_character(entry_name));
    }

    let path = Path::new(entry_name);
    if path.is_absolute() {
        return Err(GatewayError::absolute_path(entry_name));
    }

    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if is_windows_drive_letter(part.to_string_lossy().as_ref()) {
                    return Err(GatewayError::absolute_path(entry_name));
                }
                sanitized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(GatewayError::path_traversal(entry_name)),
            Component::RootDir | Component::Prefix(_) => return Err(GatewayError::absolute_path(entry_name)),
        }
    }

    if sanitized.as_os_str().is_empty() {
        return Err(GatewayError::empty_path());
    }

    Ok(sanitized)
}

/// Whether `part` is a Windows drive letter (`C:`, `d:`, ...). On Unix,
/// `Component::Normal` swallows these instead of yielding `Prefix`, so an
/// entry normalized from `C:\Windows\x` would otherwise pass through as a
/// plain relative path.
fn is_windows_drive_letter(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
