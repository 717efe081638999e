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

//! A multi-protocol gateway in front of an Apache Iceberg lakehouse: a
//! closed signal registry and codec, a per-connection state machine, a
//! middleware chain, three protocol endpoints, a query dispatcher, an
//! archive codec for packing/unpacking project trees, and the supervisor
//! that ties them together.
//!
//! This crate implements the protocol, framing, and connection-lifecycle
//! plumbing. Query execution, catalog access, storage, and credential
//! verification are injected by the embedder through the traits in
//! [`collaborators`].

#[macro_use]
extern crate log;

pub mod archive;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod framing;
pub mod middleware;
pub mod state_machine;
pub mod supervisor;
pub mod test_helpers;

pub use collaborators::{AuthProvider, ExecutionEngine, MetadataFacade, StorageFacade};
pub use config::Config;
pub use error::{GatewayError, Result};
pub use supervisor::Gateway;
