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

//! External collaborator traits the gateway dispatches to, per `spec.md`
//! §6. This crate provides framing, protocol state, middleware, and
//! endpoint plumbing; it does not implement query execution, cataloging,
//! storage, or authentication itself — those are injected by the embedder
//! through these traits.

use crate::codec::DataBlock;
use crate::context::Principal;
use crate::error::Result;
use async_trait::async_trait;

/// One column of a tabular result, as returned by [`ExecutionEngine::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    /// Column name.
    pub name: String,
    /// Column type tag.
    pub type_tag: String,
    /// Values, row-major, one entry per row.
    pub values: Vec<String>,
}

/// A complete, already-materialized query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result columns, in projection order. Empty for statements with no
    /// result set (e.g. `INSERT`).
    pub columns: Vec<ResultColumn>,
    /// Number of rows affected, for statements like `INSERT`/`UPDATE`.
    pub rows_affected: u64,
}

/// Executes parsed statements against the lakehouse. Implemented by the
/// embedder; this crate only calls it.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Executes `sql` on behalf of `principal` and returns its result.
    async fn execute(&self, sql: &str, principal: &Principal) -> Result<QueryResult>;

    /// Cancels the in-flight execution identified by `query_id`, if any.
    async fn cancel(&self, query_id: &str) -> Result<()>;
}

/// Column metadata for one table, as reported by [`MetadataFacade`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// `(column name, type tag)` pairs, in declaration order.
    pub columns: Vec<(String, String)>,
}

/// Read access to catalog metadata: table existence, schema, and listing.
/// Implemented by the embedder.
#[async_trait]
pub trait MetadataFacade: Send + Sync {
    /// Lists every table visible to `principal`.
    async fn list_tables(&self, principal: &Principal) -> Result<Vec<String>>;

    /// Looks up the schema of `table_name`, if it exists.
    async fn table_schema(&self, table_name: &str) -> Result<Option<TableSchema>>;

    /// Lists every database/namespace visible to the gateway. The default
    /// implementation reports just the two namespaces every deployment has
    /// (`SHOW DATABASES` in `spec.md` §4.6); embedders with a real namespace
    /// catalog override this.
    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(vec!["default".to_owned(), "system".to_owned()])
    }
}

/// Bulk ingestion and DDL against the lakehouse's storage layer. Implemented
/// by the embedder.
#[async_trait]
pub trait StorageFacade: Send + Sync {
    /// Appends `block`'s rows to the table it names.
    async fn ingest(&self, block: &DataBlock) -> Result<u64>;

    /// Creates `table_name` with the given `(column name, type tag)` list,
    /// for the native `CREATE TABLE` statement (`spec.md` §4.6).
    async fn create_table(&self, table_name: &str, columns: Vec<(String, String)>) -> Result<()>;

    /// Drops `table_name`, for the native `DROP TABLE` statement.
    async fn remove_table(&self, table_name: &str) -> Result<()>;
}

/// Verifies client-supplied credentials and resolves the resulting
/// [`Principal`]'s permissions. Implemented by the embedder.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Verifies `username`/`password` and returns the authenticated
    /// principal, or a [`crate::error::GatewayError::invalid_credentials`]
    /// error.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Principal>;
}

/// A trivial [`AuthProvider`] that admits every connection as a principal
/// with no permissions restricted (`auth_enabled = false` in
/// [`crate::config::Config`] routes here). Not intended for production use.
pub struct AllowAllAuthProvider;

#[async_trait]
impl AuthProvider for AllowAllAuthProvider {
    async fn authenticate(&self, username: &str, _password: &str) -> Result<Principal> {
        Ok(Principal {
            username: username.to_owned(),
            permissions: vec!["select".to_owned(), "insert".to_owned(), "admin".to_owned()],
        })
    }
}
