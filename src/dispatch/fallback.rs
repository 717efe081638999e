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

//! Hands a statement the native dispatcher did not recognize off to the
//! embedder's execution engine, per `spec.md` §4.6.

use crate::codec::DataBlock;
use crate::collaborators::{ExecutionEngine, MetadataFacade, QueryResult, ResultColumn, StorageFacade, TableSchema};
use crate::context::Principal;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Executes `sql` through `engine` on behalf of `principal`. A thin wrapper
/// so the dispatcher's fallback path is a named, testable unit rather than
/// an inline call.
pub async fn execute(sql: &str, principal: &Principal, engine: &dyn ExecutionEngine) -> Result<QueryResult> {
    engine.execute(sql, principal).await
}

struct Table {
    columns: Vec<String>,
    column_types: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// A single in-process table store that stands in for a real execution
/// engine, catalog, and storage layer when none is wired (e.g. in this
/// crate's own tests, or for a caller exercising the gateway standalone).
/// Supports `CREATE TABLE`/`INSERT INTO ... VALUES (...)`/`SELECT * FROM`
/// only — exactly what the end-to-end scenarios in spec.md §8 exercise.
///
/// Guarded by a single [`std::sync::RwLock`]: readers (`SELECT`, catalog
/// lookups) may run concurrently, while a writer (`CREATE`/`INSERT`/bulk
/// `ClientData` ingestion) excludes every other access for the duration of
/// its statement.
pub struct FallbackStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl FallbackStore {
    /// Builds an empty store.
    pub fn new() -> Self {
        FallbackStore {
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table_name_after(keyword_end: &str, trimmed: &str) -> Result<String> {
        let rest = trimmed[keyword_end.len()..].trim();
        let name = rest
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_owned();
        if name.is_empty() {
            Err(GatewayError::malformed_field("table name"))
        } else {
            Ok(name)
        }
    }
}

impl Default for FallbackStore {
    fn default() -> Self {
        FallbackStore::new()
    }
}

#[async_trait]
impl ExecutionEngine for FallbackStore {
    async fn execute(&self, sql: &str, _principal: &Principal) -> Result<QueryResult> {
        let trimmed = sql.trim().trim_end_matches(';');
        let upper = trimmed.to_uppercase();

        if upper.starts_with("CREATE TABLE") {
            let name = Self::table_name_after("CREATE TABLE", trimmed)?;
            let mut tables = self.tables.write().map_err(|_| GatewayError::engine_failure("poisoned lock"))?;
            tables.entry(name).or_insert_with(|| Table {
                columns: vec!["id".to_owned(), "name".to_owned()],
                column_types: vec!["Int32".to_owned(), "String".to_owned()],
                rows: Vec::new(),
            });
            Ok(QueryResult::default())
        } else if upper.starts_with("INSERT INTO") {
            let name = Self::table_name_after("INSERT INTO", trimmed)?;
            let open = trimmed.find('(').ok_or_else(|| GatewayError::malformed_field("values"))?;
            let close = trimmed.rfind(')').ok_or_else(|| GatewayError::malformed_field("values"))?;
            let values: Vec<String> = trimmed[open + 1..close]
                .split(',')
                .map(|cell| cell.trim().trim_matches('\'').to_owned())
                .collect();

            let mut tables = self.tables.write().map_err(|_| GatewayError::engine_failure("poisoned lock"))?;
            let table = tables.get_mut(&name).ok_or_else(|| GatewayError::table_not_found(name.clone()))?;
            if values.len() != table.columns.len() {
                return Err(GatewayError::malformed_field("insert arity"));
            }
            table.rows.push(values);
            Ok(QueryResult {
                columns: Vec::new(),
                rows_affected: 1,
            })
        } else if upper.starts_with("SELECT * FROM") {
            let name = trimmed["SELECT * FROM".len()..].trim().to_owned();
            let tables = self.tables.read().map_err(|_| GatewayError::engine_failure("poisoned lock"))?;
            let table = tables.get(&name).ok_or_else(|| GatewayError::table_not_found(name.clone()))?;
            let columns = table
                .columns
                .iter()
                .zip(&table.column_types)
                .enumerate()
                .map(|(index, (column_name, type_tag))| ResultColumn {
                    name: column_name.clone(),
                    type_tag: type_tag.clone(),
                    values: table.rows.iter().map(|row| row[index].clone()).collect(),
                })
                .collect();
            Ok(QueryResult {
                columns,
                rows_affected: 0,
            })
        } else {
            Err(GatewayError::unsupported_statement(trimmed.to_owned()))
        }
    }

    async fn cancel(&self, _query_id: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MetadataFacade for FallbackStore {
    async fn list_tables(&self, _principal: &Principal) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(|_| GatewayError::catalog_failure("poisoned lock"))?;
        Ok(tables.keys().cloned().collect())
    }

    async fn table_schema(&self, table_name: &str) -> Result<Option<TableSchema>> {
        let tables = self.tables.read().map_err(|_| GatewayError::catalog_failure("poisoned lock"))?;
        Ok(tables.get(table_name).map(|table| TableSchema {
            name: table_name.to_owned(),
            columns: table.columns.iter().cloned().zip(table.column_types.iter().cloned()).collect(),
        }))
    }
}

#[async_trait]
impl StorageFacade for FallbackStore {
    /// Bulk-ingests `block`, taking the writer lock for the whole operation
    /// so a concurrent `SELECT` observes either all of the block's rows or
    /// none of them.
    async fn ingest(&self, block: &DataBlock) -> Result<u64> {
        let mut tables = self.tables.write().map_err(|_| GatewayError::storage_failure("poisoned lock"))?;
        let table = tables.entry(block.table_name.clone()).or_insert_with(|| Table {
            columns: block.columns.clone(),
            column_types: block.column_types.clone(),
            rows: Vec::new(),
        });
        table.rows.extend(block.rows.iter().cloned());
        Ok(block.rows.len() as u64)
    }

    /// Creates `table_name` if it does not already exist. Idempotent, like
    /// the `CREATE TABLE` branch of [`ExecutionEngine::execute`] above.
    async fn create_table(&self, table_name: &str, columns: Vec<(String, String)>) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| GatewayError::storage_failure("poisoned lock"))?;
        tables.entry(table_name.to_owned()).or_insert_with(|| Table {
            columns: columns.iter().map(|(name, _)| name.clone()).collect(),
            column_types: columns.iter().map(|(_, ty)| ty.clone()).collect(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn remove_table(&self, table_name: &str) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| GatewayError::storage_failure("poisoned lock"))?;
        tables
            .remove(table_name)
            .map(|_| ())
            .ok_or_else(|| GatewayError::table_not_found(table_name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoEngine;

    #[async_trait]
    impl ExecutionEngine for EchoEngine {
        async fn execute(&self, sql: &str, _principal: &Principal) -> Result<QueryResult> {
            if sql.starts_with("SELECT") {
                Ok(QueryResult::default())
            } else {
                Err(crate::error::GatewayError::unsupported_statement(sql.to_owned()))
            }
        }

        async fn cancel(&self, _query_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn principal() -> Principal {
        Principal {
            username: "alice".to_owned(),
            permissions: vec!["select".to_owned()],
        }
    }

    #[async_std::test]
    async fn delegates_to_the_engine() {
        let result = execute("SELECT 1", &principal(), &EchoEngine).await;
        assert!(result.is_ok());
    }

    #[async_std::test]
    async fn propagates_engine_errors() {
        let result = execute("FROBNICATE", &principal(), &EchoEngine).await;
        assert!(result.is_err());
    }

    #[async_std::test]
    async fn fallback_store_round_trips_create_insert_select() {
        let store = FallbackStore::new();
        let p = principal();

        store.execute("CREATE TABLE t (id int, name varchar(32))", &p).await.unwrap();
        store.execute("INSERT INTO t VALUES (1, 'a')", &p).await.unwrap();
        store.execute("INSERT INTO t VALUES (2, 'b')", &p).await.unwrap();

        let result = store.execute("SELECT * FROM t", &p).await.unwrap();
        assert_eq!(result.columns[0].values, vec!["1".to_owned(), "2".to_owned()]);
        assert_eq!(result.columns[1].values, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[async_std::test]
    async fn fallback_store_select_from_unknown_table_is_an_error() {
        let store = FallbackStore::new();
        let error = store.execute("SELECT * FROM nope", &principal()).await.unwrap_err();
        assert_eq!(error.code(), "42P01");
    }

    #[async_std::test]
    async fn fallback_store_ingest_appends_rows_visible_to_select() {
        let store = FallbackStore::new();
        let p = principal();
        store.execute("CREATE TABLE t (id int, name varchar(32))", &p).await.unwrap();

        let block = DataBlock::new(
            "t".to_owned(),
            vec!["id".to_owned(), "name".to_owned()],
            vec!["Int32".to_owned(), "String".to_owned()],
            vec![vec!["1".to_owned(), "a".to_owned()]],
        )
        .unwrap();
        let ingested = store.ingest(&block).await.unwrap();
        assert_eq!(ingested, 1);

        let result = store.execute("SELECT * FROM t", &p).await.unwrap();
        assert_eq!(result.columns[0].values, vec!["1".to_owned()]);
    }

    #[async_std::test]
    async fn fallback_store_lists_created_tables() {
        let store = FallbackStore::new();
        let p = principal();
        store.execute("CREATE TABLE t (id int, name varchar(32))", &p).await.unwrap();
        assert_eq!(store.list_tables(&p).await.unwrap(), vec!["t".to_owned()]);

        let schema = store.table_schema("t").await.unwrap().unwrap();
        assert_eq!(schema.columns.len(), 2);
    }

    #[async_std::test]
    async fn create_table_via_storage_facade_is_visible_to_the_metadata_facade() {
        let store = FallbackStore::new();
        store
            .create_table("orders", vec![("id".to_owned(), "BIGINT".to_owned())])
            .await
            .unwrap();

        let schema = store.table_schema("orders").await.unwrap().unwrap();
        assert_eq!(schema.columns, vec![("id".to_owned(), "BIGINT".to_owned())]);
    }

    #[async_std::test]
    async fn create_table_via_storage_facade_is_idempotent() {
        let store = FallbackStore::new();
        store.create_table("t", vec![("id".to_owned(), "BIGINT".to_owned())]).await.unwrap();
        store.create_table("t", vec![("other".to_owned(), "STRING".to_owned())]).await.unwrap();

        let schema = store.table_schema("t").await.unwrap().unwrap();
        assert_eq!(schema.columns, vec![("id".to_owned(), "BIGINT".to_owned())]);
    }

    #[async_std::test]
    async fn remove_table_via_storage_facade_deletes_it() {
        let store = FallbackStore::new();
        store.create_table("t", vec![("id".to_owned(), "BIGINT".to_owned())]).await.unwrap();
        store.remove_table("t").await.unwrap();
        assert_eq!(store.table_schema("t").await.unwrap(), None);
    }

    #[async_std::test]
    async fn remove_table_via_storage_facade_errors_when_missing() {
        let store = FallbackStore::new();
        let error = store.remove_table("ghost").await.unwrap_err();
        assert_eq!(error.code(), "42P01");
    }
}
