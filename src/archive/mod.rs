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

//! The archive codec: packs a directory tree into a manifest-carrying,
//! gzip-compressed tar archive, and unpacks one back out with path
//! sanitization and digest verification, per `spec.md` §4.8.

pub mod manifest;
pub mod pack;
pub mod sanitize;
pub mod unpack;

pub use manifest::{Manifest, ManifestEntry, PackageMetadata};
pub use pack::pack_directory;
pub use sanitize::sanitize_entry_path;
pub use unpack::unpack_archive;
