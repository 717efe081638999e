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

//! Per-connection state: the state machine's states and the mutable
//! bookkeeping a connection carries across its lifetime.

use std::time::Instant;
use uuid::Uuid;

/// The states a connection moves through, per `spec.md` §4.3. Transitions
/// are enforced by [`crate::state_machine::ConnectionStateMachine`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the client's opening handshake.
    Handshaking,
    /// Handshake received; waiting on the auth provider.
    Authenticating,
    /// Authenticated and not currently running a query.
    Idle,
    /// A query has been accepted and is being prepared or executed.
    Querying,
    /// Result rows are being streamed back to the client.
    Streaming,
    /// The connection is draining in-flight work before close.
    Closing,
    /// Terminal state; no further signals are accepted.
    Closed,
}

impl ConnectionState {
    /// A short name for this state, used in diagnostics and in
    /// [`crate::error::GatewayError::unexpected_signal`].
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::Authenticating => "Authenticating",
            ConnectionState::Idle => "Idle",
            ConnectionState::Querying => "Querying",
            ConnectionState::Streaming => "Streaming",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        }
    }
}

/// The principal a connection authenticated as.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Login name reported by the client.
    pub username: String,
    /// Permissions granted to this principal.
    pub permissions: Vec<String>,
}

impl Principal {
    /// Whether this principal carries `permission`.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Per-connection bookkeeping threaded through the middleware chain and the
/// endpoint handlers. One `ConnectionContext` is created per accepted socket
/// and lives for the connection's lifetime.
pub struct ConnectionContext {
    /// Unique id assigned at accept time; used for cancellation routing and
    /// logging correlation.
    pub connection_id: Uuid,
    /// Peer address, for logging.
    pub peer_address: String,
    /// The authenticated principal, set once `Authenticating` completes.
    pub principal: Option<Principal>,
    /// Id of the query currently in flight, if any.
    pub active_query_id: Option<String>,
    /// When the connection last received or sent a signal; used by the pool
    /// middleware's idle reaper.
    pub last_activity: Instant,
    /// Number of queries this connection has run since opening.
    pub queries_served: u64,
}

impl ConnectionContext {
    /// Creates a fresh context for a just-accepted connection.
    pub fn new(peer_address: impl Into<String>) -> Self {
        ConnectionContext {
            connection_id: Uuid::new_v4(),
            peer_address: peer_address.into(),
            principal: None,
            active_query_id: None,
            last_activity: Instant::now(),
            queries_served: 0,
        }
    }

    /// Records activity, resetting the idle-reaper clock.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether this connection has completed authentication.
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}
