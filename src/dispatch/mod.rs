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

//! The query dispatcher: tries the native statement handler first, then
//! falls back to the embedder's execution engine, per `spec.md` §4.6.

pub mod fallback;
pub mod native_statements;

use crate::collaborators::{ExecutionEngine, MetadataFacade, QueryResult, StorageFacade};
use crate::config::ResourceLimits;
use crate::context::Principal;
use crate::error::{GatewayError, Result};
use std::sync::Arc;
use std::time::Instant;

/// Routes a statement to the native handler or the execution engine.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn ExecutionEngine>,
    metadata: Arc<dyn MetadataFacade>,
    storage: Option<Arc<dyn StorageFacade>>,
    limits: ResourceLimits,
}

impl Dispatcher {
    /// Builds a dispatcher over the given collaborators. `CREATE`/`DROP
    /// TABLE` fall through to `engine` unless [`Dispatcher::with_storage`]
    /// wires a storage facade. Resource caps default to
    /// [`ResourceLimits::default`] unless overridden by
    /// [`Dispatcher::with_resource_limits`].
    pub fn new(engine: Arc<dyn ExecutionEngine>, metadata: Arc<dyn MetadataFacade>) -> Self {
        Dispatcher {
            engine,
            metadata,
            storage: None,
            limits: ResourceLimits::default(),
        }
    }

    /// Routes the native `CREATE TABLE`/`DROP TABLE` statements (`spec.md`
    /// §4.6) to `storage` instead of the execution engine.
    pub fn with_storage(mut self, storage: Arc<dyn StorageFacade>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Overrides the per-query duration and row caps enforced on every
    /// dispatch, per `spec.md` §4.4.
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Executes `sql` on behalf of `principal`, preferring the native
    /// statement handler when it recognizes the statement. The result is
    /// checked against [`ResourceLimits::max_query_duration`] and
    /// [`ResourceLimits::max_query_rows`] before it is returned; a single
    /// query is always in flight per connection, so `max_concurrent_queries`
    /// is enforced structurally by the state machine's `DuplicateQuery`
    /// rejection rather than counted here.
    pub async fn dispatch(&self, sql: &str, principal: &Principal) -> Result<QueryResult> {
        let started = Instant::now();
        let storage = self.storage.as_deref();
        let result = if let Some(result) =
            native_statements::try_handle(sql, principal, self.metadata.as_ref(), storage).await?
        {
            result
        } else {
            fallback::execute(sql, principal, self.engine.as_ref()).await?
        };

        let elapsed = started.elapsed();
        if elapsed > self.limits.max_query_duration {
            return Err(GatewayError::duration_exceeded(self.limits.max_query_duration.as_millis() as u64));
        }
        let rows = result.columns.iter().map(|column| column.values.len()).max().unwrap_or(0) as u64;
        if rows > self.limits.max_query_rows {
            return Err(GatewayError::rows_exceeded(self.limits.max_query_rows));
        }
        Ok(result)
    }

    /// Cancels the in-flight query `query_id` on the execution engine.
    pub async fn cancel(&self, query_id: &str) -> Result<()> {
        self.engine.cancel(query_id).await
    }
}
