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

//! The codec and signal registry: the closed set of client/server signals,
//! their kind-byte assignment, and the process-wide registry that binds
//! kind bytes to parse/construct behavior.

pub mod envelope;
pub mod registry;
pub mod signal;

pub use envelope::Codec;
pub use registry::Registry;
pub use signal::{ClientSignal, ColumnFrame, DataBlock, Direction, ProfileInfo, Progress, ServerSignal, SignalMeta};
