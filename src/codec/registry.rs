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

//! Process-wide, immutable-after-init mapping from kind byte to signal
//! metadata. Registration enforces the 1:1 kind ↔ direction invariant at
//! startup rather than at decode time, per `spec.md` §8's registry
//! uniqueness property.

use crate::codec::signal::{Direction, SignalMeta};
use crate::error::{GatewayError, Result};
use std::collections::HashMap;

/// Holds one [`SignalMeta`] per registered kind, split by direction so a
/// kind byte can be independently reused for a client signal and a server
/// signal (they are different wires).
#[derive(Debug, Default)]
pub struct Registry {
    client_meta: HashMap<u8, SignalMeta>,
    server_meta: HashMap<u8, SignalMeta>,
}

impl Registry {
    /// An empty registry with nothing registered.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a client-originated signal kind. Fails if `kind` is already
    /// registered on the client side.
    pub fn register_client_signal(&mut self, kind: u8, name: &'static str, version: u32) -> Result<()> {
        if self.client_meta.contains_key(&kind) {
            return Err(GatewayError::malformed_field("duplicate client signal kind"));
        }
        self.client_meta.insert(
            kind,
            SignalMeta {
                direction: Direction::ClientToServer,
                name,
                version,
            },
        );
        Ok(())
    }

    /// Registers a server-originated signal kind. Fails if `kind` is already
    /// registered on the server side.
    pub fn register_server_signal(&mut self, kind: u8, name: &'static str, version: u32) -> Result<()> {
        if self.server_meta.contains_key(&kind) {
            return Err(GatewayError::malformed_field("duplicate server signal kind"));
        }
        self.server_meta.insert(
            kind,
            SignalMeta {
                direction: Direction::ServerToClient,
                name,
                version,
            },
        );
        Ok(())
    }

    /// Looks up metadata for a client-originated kind.
    pub fn client_meta(&self, kind: u8) -> Option<&SignalMeta> {
        self.client_meta.get(&kind)
    }

    /// Looks up metadata for a server-originated kind.
    pub fn server_meta(&self, kind: u8) -> Option<&SignalMeta> {
        self.server_meta.get(&kind)
    }

    /// Builds the registry with every built-in signal kind known to this
    /// crate, per the kind table in `spec.md` §6. Called once by the
    /// supervisor at startup and shared thereafter via `Arc`.
    pub fn with_builtin_signals() -> Result<Registry> {
        const REVISION: u32 = 54460;
        let mut registry = Registry::new();

        registry.register_client_signal(0, "ClientHello", REVISION)?;
        registry.register_client_signal(1, "ClientQuery", REVISION)?;
        registry.register_client_signal(2, "ClientData", REVISION)?;
        registry.register_client_signal(3, "ClientCancel", REVISION)?;
        registry.register_client_signal(4, "ClientPing", REVISION)?;

        registry.register_server_signal(0, "ServerHello", REVISION)?;
        registry.register_server_signal(1, "ServerData", REVISION)?;
        registry.register_server_signal(2, "ServerException", REVISION)?;
        registry.register_server_signal(3, "ServerProgress", REVISION)?;
        registry.register_server_signal(4, "ServerPong", REVISION)?;
        registry.register_server_signal(5, "ServerEndOfStream", REVISION)?;
        registry.register_server_signal(6, "ServerProfileInfo", REVISION)?;
        registry.register_server_signal(7, "ServerTotals", REVISION)?;
        registry.register_server_signal(8, "ServerExtremes", REVISION)?;
        registry.register_server_signal(9, "ServerTablesStatus", REVISION)?;
        registry.register_server_signal(10, "ServerLog", REVISION)?;
        registry.register_server_signal(11, "ServerTableColumns", REVISION)?;
        registry.register_server_signal(12, "ServerPartUUIDs", REVISION)?;
        registry.register_server_signal(13, "ServerReadTaskRequest", REVISION)?;
        registry.register_server_signal(14, "ServerProfileEvents", REVISION)?;
        registry.register_server_signal(15, "ServerTreeReadTaskRequest", REVISION)?;

        Ok(registry)
    }
}
