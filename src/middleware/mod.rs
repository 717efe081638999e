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

//! The middleware chain: five hook points consulted by every endpoint
//! handler around the five moments in a connection's life that `spec.md`
//! §4.4 names — connect/disconnect, each signal read, each signal write,
//! each error, and each query dispatch.

pub mod auth;
pub mod circuit_breaker;
pub mod pool;

use crate::codec::{ClientSignal, ServerSignal};
use crate::context::ConnectionContext;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// One hook set a middleware can implement. Every method has a no-op
/// default so a middleware only overrides the hooks it cares about.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &'static str;

    /// Fired once when a connection is accepted, before the handshake.
    async fn on_connect(&self, _context: &mut ConnectionContext) -> Result<()> {
        Ok(())
    }

    /// Fired once when a connection is torn down, success or failure.
    async fn on_disconnect(&self, _context: &ConnectionContext) {}

    /// Fired after a signal is decoded, before the endpoint handler acts on
    /// it.
    async fn on_read(&self, _context: &mut ConnectionContext, _signal: &ClientSignal) -> Result<()> {
        Ok(())
    }

    /// Fired before a signal is serialized onto the wire.
    async fn on_write(&self, _context: &mut ConnectionContext, _signal: &ServerSignal) -> Result<()> {
        Ok(())
    }

    /// Fired whenever a fallible step on the connection fails, whether or
    /// not the error is fatal.
    async fn on_error(&self, _context: &mut ConnectionContext, _error: &GatewayError) {}

    /// Fired before a query is handed to the dispatcher. Returning an error
    /// here rejects the query without reaching the execution engine.
    async fn on_query(&self, _context: &mut ConnectionContext, _sql: &str) -> Result<()> {
        Ok(())
    }
}

/// An ordered sequence of middlewares, run front-to-back for every hook.
/// Built once at startup from [`crate::config::Config`] and shared via
/// `Arc` across every connection.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// An empty chain.
    pub fn new() -> Self {
        MiddlewareChain { middlewares: Vec::new() }
    }

    /// Appends a middleware to the end of the chain.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Runs every middleware's `on_connect`, stopping at the first error.
    pub async fn on_connect(&self, context: &mut ConnectionContext) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_connect(context).await?;
        }
        Ok(())
    }

    /// Runs every middleware's `on_disconnect`. Infallible by design: a
    /// middleware cannot veto a connection's teardown.
    pub async fn on_disconnect(&self, context: &ConnectionContext) {
        for middleware in &self.middlewares {
            middleware.on_disconnect(context).await;
        }
    }

    /// Runs every middleware's `on_read`, stopping at the first error.
    pub async fn on_read(&self, context: &mut ConnectionContext, signal: &ClientSignal) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_read(context, signal).await?;
        }
        Ok(())
    }

    /// Runs every middleware's `on_write`, stopping at the first error.
    pub async fn on_write(&self, context: &mut ConnectionContext, signal: &ServerSignal) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_write(context, signal).await?;
        }
        Ok(())
    }

    /// Runs every middleware's `on_error`. Infallible by design.
    pub async fn on_error(&self, context: &mut ConnectionContext, error: &GatewayError) {
        for middleware in &self.middlewares {
            middleware.on_error(context, error).await;
        }
    }

    /// Runs every middleware's `on_query`, stopping at the first error.
    pub async fn on_query(&self, context: &mut ConnectionContext, sql: &str) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_query(context, sql).await?;
        }
        Ok(())
    }
}
