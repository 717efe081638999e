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

//! The per-connection state machine from `spec.md` §4.3:
//! `Handshaking → Authenticating → Idle ⇄ Querying → Streaming → Idle`,
//! with `Closing → Closed` reachable from any state.

use crate::context::ConnectionState;
use crate::error::{GatewayError, Result};

/// Enforces the legal transitions between [`ConnectionState`]s. Endpoint
/// handlers hold one instance per connection and consult it before acting
/// on an incoming signal.
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    /// A fresh machine, starting in `Handshaking`.
    pub fn new() -> Self {
        ConnectionStateMachine {
            state: ConnectionState::Handshaking,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempts to move to `target`, rejecting the transition if it is not
    /// legal from the current state. `signal_name` is used only to build a
    /// descriptive error.
    pub fn transition(&mut self, target: ConnectionState, signal_name: &'static str) -> Result<()> {
        if !Self::is_legal(self.state, target) {
            return Err(GatewayError::unexpected_signal(self.state.name(), signal_name));
        }
        self.state = target;
        Ok(())
    }

    fn is_legal(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;
        if to == Closing || to == Closed {
            return from != Closed;
        }
        matches!(
            (from, to),
            (Handshaking, Authenticating)
                | (Authenticating, Idle)
                | (Idle, Querying)
                | (Querying, Streaming)
                | (Querying, Idle)
                | (Streaming, Idle)
                | (Closing, Closed)
        )
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        ConnectionStateMachine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConnectionState::*;

    #[test]
    fn happy_path_round_trip() {
        let mut machine = ConnectionStateMachine::new();
        assert_eq!(machine.state(), Handshaking);
        machine.transition(Authenticating, "ClientHello").unwrap();
        machine.transition(Idle, "AuthComplete").unwrap();
        machine.transition(Querying, "ClientQuery").unwrap();
        machine.transition(Streaming, "ServerData").unwrap();
        machine.transition(Idle, "ServerEndOfStream").unwrap();
        assert_eq!(machine.state(), Idle);
    }

    #[test]
    fn query_while_querying_is_rejected() {
        let mut machine = ConnectionStateMachine::new();
        machine.transition(Authenticating, "ClientHello").unwrap();
        machine.transition(Idle, "AuthComplete").unwrap();
        machine.transition(Querying, "ClientQuery").unwrap();
        let result = machine.transition(Querying, "ClientQuery");
        assert!(result.is_err());
    }

    #[test]
    fn closing_is_reachable_from_any_non_closed_state() {
        for state in [Handshaking, Authenticating, Idle, Querying, Streaming] {
            let mut machine = ConnectionStateMachine { state };
            assert!(machine.transition(Closing, "Shutdown").is_ok());
            assert!(machine.transition(Closed, "Shutdown").is_ok());
        }
    }

    #[test]
    fn closed_accepts_nothing() {
        let mut machine = ConnectionStateMachine { state: Closed };
        assert!(machine.transition(Idle, "ClientPing").is_err());
    }

    #[test]
    fn skipping_handshake_is_rejected() {
        let mut machine = ConnectionStateMachine::new();
        let result = machine.transition(Idle, "ClientQuery");
        assert!(result.is_err());
    }
}
