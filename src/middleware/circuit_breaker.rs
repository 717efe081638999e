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

//! Trips on a run of dispatch failures and rejects new queries until a
//! recovery timeout elapses, per `spec.md` §4.4's Closed/Open/Half-Open
//! states.

use crate::config::CircuitBreakerConfig;
use crate::context::ConnectionContext;
use crate::error::{GatewayError, GatewayErrorKind, ResourceErrorKind, Result};
use crate::middleware::Middleware;
use async_mutex::Mutex;
use async_trait::async_trait;
use std::time::Instant;

/// The breaker's current state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BreakerState {
    /// Traffic flows normally.
    Closed,
    /// Traffic is rejected outright.
    Open,
    /// One probe query is allowed through to test recovery.
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
}

/// Shared across every connection on an endpoint; trips once
/// `failure_threshold` consecutive dispatch failures land within
/// `failure_window`.
pub struct CircuitBreakerMiddleware {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreakerMiddleware {
    /// Builds a breaker starting in the `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreakerMiddleware {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                window_start: Instant::now(),
                opened_at: None,
            }),
        }
    }

    /// The breaker's current state, resolving an elapsed recovery timeout
    /// into `Half-Open` as a side effect.
    pub async fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().await;
        self.maybe_recover(&mut inner);
        inner.state
    }

    fn maybe_recover(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        if inner.window_start.elapsed() > self.config.failure_window {
            inner.consecutive_failures = 0;
            inner.window_start = Instant::now();
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.failure_threshold || inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    /// Trips the breaker without waiting for `failure_threshold`, for a
    /// resource-exceeded signal per `spec.md` §4.4.
    async fn open_immediately(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
    }
}

/// Whether `kind` represents a query having overrun one of its resource
/// caps, as opposed to an admission-control rejection (pool full, breaker
/// already open).
fn is_resource_exceeded(kind: &ResourceErrorKind) -> bool {
    matches!(
        kind,
        ResourceErrorKind::DurationExceeded { .. } | ResourceErrorKind::RowsExceeded { .. }
    )
}

#[async_trait]
impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn on_query(&self, _context: &mut ConnectionContext, _sql: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.maybe_recover(&mut inner);
        if inner.state == BreakerState::Open {
            return Err(GatewayError::circuit_open());
        }
        Ok(())
    }

    async fn on_error(&self, _context: &mut ConnectionContext, error: &GatewayError) {
        match error.kind() {
            GatewayErrorKind::Dispatch(_) => self.record_failure().await,
            GatewayErrorKind::Resource(kind) if is_resource_exceeded(kind) => self.open_immediately().await,
            _ => {}
        }
    }
}

impl CircuitBreakerMiddleware {
    /// Called by the dispatcher on a successful query, resetting the
    /// failure count and closing the breaker.
    pub async fn note_success(&self) {
        self.record_success().await;
    }
}
