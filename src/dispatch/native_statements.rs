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

//! Statements the gateway answers itself, without reaching the execution
//! engine: catalog introspection from the [`MetadataFacade`], literal-only
//! `SELECT`s, and `CREATE`/`DROP TABLE` against the [`StorageFacade`] when
//! one is wired, per `spec.md` §4.6.

use crate::collaborators::{MetadataFacade, QueryResult, ResultColumn, StorageFacade};
use crate::context::Principal;
use crate::error::{GatewayError, Result};

/// Attempts to answer `sql` directly, without reaching the execution
/// engine. Returns `None` if `sql` is not one of the recognized native
/// statements, so the caller can fall back to the engine.
pub async fn try_handle(
    sql: &str,
    principal: &Principal,
    metadata: &dyn MetadataFacade,
    storage: Option<&dyn StorageFacade>,
) -> Result<Option<QueryResult>> {
    if let Some(result) = literal_only_select(sql) {
        return Ok(Some(result));
    }

    let normalized = sql.trim().trim_end_matches(';').to_ascii_uppercase();

    if normalized == "SHOW DATABASES" {
        let databases = metadata.list_databases().await?;
        return Ok(Some(QueryResult {
            columns: vec![ResultColumn {
                name: "database_name".to_owned(),
                type_tag: "String".to_owned(),
                values: databases,
            }],
            rows_affected: 0,
        }));
    }

    if normalized == "SHOW TABLES" {
        let tables = metadata.list_tables(principal).await?;
        return Ok(Some(QueryResult {
            columns: vec![ResultColumn {
                name: "table_name".to_owned(),
                type_tag: "String".to_owned(),
                values: tables,
            }],
            rows_affected: 0,
        }));
    }

    if let Some(upper_table_name) = normalized.strip_prefix("SHOW COLUMNS FROM ") {
        let table_name = qualifier_stripped(original_suffix(sql, upper_table_name));
        let schema = metadata.table_schema(&table_name).await?;
        return match schema {
            Some(schema) => Ok(Some(columns_result(&schema.columns))),
            None => Err(GatewayError::table_not_found(table_name)),
        };
    }

    if let Some(upper_table_name) = normalized.strip_prefix("DESCRIBE ") {
        let table_name = qualifier_stripped(original_suffix(sql, upper_table_name));
        let schema = metadata.table_schema(&table_name).await?;
        return match schema {
            Some(schema) => Ok(Some(describe_result(&schema.columns))),
            None => Err(GatewayError::table_not_found(table_name)),
        };
    }

    if let Some(storage) = storage {
        if let Some(upper_rest) = normalized.strip_prefix("CREATE TABLE ") {
            let rest = original_suffix(sql, upper_rest);
            let open = rest.find('(').ok_or_else(|| GatewayError::malformed_field("column list"))?;
            let close = rest.rfind(')').ok_or_else(|| GatewayError::malformed_field("column list"))?;
            let table_name = rest[..open].trim().to_owned();
            let columns = parse_column_list(&rest[open + 1..close])?;
            storage.create_table(&table_name, columns).await?;
            return Ok(Some(QueryResult::default()));
        }

        if let Some(upper_rest) = normalized.strip_prefix("DROP TABLE ") {
            let table_name = original_suffix(sql, upper_rest).trim().to_owned();
            storage.remove_table(&table_name).await?;
            return Ok(Some(QueryResult::default()));
        }
    }

    Ok(None)
}

/// Recovers the original-case suffix of `sql` that `normalized_suffix` (a
/// slice of `sql`'s uppercased form, after a prefix has been stripped)
/// corresponds to, so string literals and identifiers keep their original
/// case.
fn original_suffix<'a>(sql: &'a str, normalized_suffix: &str) -> &'a str {
    let trimmed = sql.trim().trim_end_matches(';');
    &trimmed[trimmed.len() - normalized_suffix.len()..]
}

/// `SHOW COLUMNS FROM t FROM db` / `DESCRIBE db.t` both name a database the
/// gateway does not otherwise model; strip it rather than reject the
/// statement.
fn qualifier_stripped(table_reference: &str) -> String {
    let table_reference = match table_reference.to_ascii_uppercase().find(" FROM ") {
        Some(index) => &table_reference[..index],
        None => table_reference,
    };
    match table_reference.rsplit_once('.') {
        Some((_, table)) => table.trim().to_owned(),
        None => table_reference.trim().to_owned(),
    }
}

fn columns_result(columns: &[(String, String)]) -> QueryResult {
    QueryResult {
        columns: vec![
            ResultColumn {
                name: "column_name".to_owned(),
                type_tag: "String".to_owned(),
                values: columns.iter().map(|(name, _)| name.clone()).collect(),
            },
            ResultColumn {
                name: "column_type".to_owned(),
                type_tag: "String".to_owned(),
                values: columns.iter().map(|(_, ty)| ty.clone()).collect(),
            },
        ],
        rows_affected: 0,
    }
}

/// `DESCRIBE`'s traditional Field/Type/Null/Key/Default/Extra shape. This
/// crate's [`crate::collaborators::TableSchema`] carries no nullability or
/// key metadata, so those columns report a fixed placeholder rather than
/// guessing.
fn describe_result(columns: &[(String, String)]) -> QueryResult {
    let blank = || columns.iter().map(|_| String::new()).collect::<Vec<_>>();
    QueryResult {
        columns: vec![
            ResultColumn {
                name: "Field".to_owned(),
                type_tag: "String".to_owned(),
                values: columns.iter().map(|(name, _)| name.clone()).collect(),
            },
            ResultColumn {
                name: "Type".to_owned(),
                type_tag: "String".to_owned(),
                values: columns.iter().map(|(_, ty)| ty.clone()).collect(),
            },
            ResultColumn {
                name: "Null".to_owned(),
                type_tag: "String".to_owned(),
                values: columns.iter().map(|_| "YES".to_owned()).collect(),
            },
            ResultColumn {
                name: "Key".to_owned(),
                type_tag: "String".to_owned(),
                values: blank(),
            },
            ResultColumn {
                name: "Default".to_owned(),
                type_tag: "String".to_owned(),
                values: columns.iter().map(|_| "NULL".to_owned()).collect(),
            },
            ResultColumn {
                name: "Extra".to_owned(),
                type_tag: "String".to_owned(),
                values: blank(),
            },
        ],
        rows_affected: 0,
    }
}

/// Answers `SELECT <integer literal>` and `SELECT '<string literal>'`
/// locally, without consulting the catalog or the engine (`spec.md` §4.6,
/// end-to-end scenario 3).
fn literal_only_select(sql: &str) -> Option<QueryResult> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.len() <= 6 || !trimmed[..6].eq_ignore_ascii_case("SELECT") {
        return None;
    }
    let rest = trimmed[6..].trim();
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return None;
    }

    if let Ok(value) = rest.parse::<i64>() {
        return Some(literal_result("UInt32", value.to_string()));
    }

    if rest.len() >= 2 && rest.starts_with('\'') && rest.ends_with('\'') {
        let inner = &rest[1..rest.len() - 1];
        if !inner.contains('\'') {
            return Some(literal_result("String", inner.to_owned()));
        }
    }

    None
}

fn literal_result(type_tag: &str, value: String) -> QueryResult {
    QueryResult {
        columns: vec![ResultColumn {
            name: "result".to_owned(),
            type_tag: type_tag.to_owned(),
            values: vec![value],
        }],
        rows_affected: 0,
    }
}

/// Splits a `CREATE TABLE` column list on top-level commas, so a type like
/// `VARCHAR(32)` is not itself mistaken for two columns.
fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_owned());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_owned());
    }
    parts
}

/// Parses `col type [len] [NOT NULL], …` into `(name, type)` pairs. Length
/// and nullability are accepted but not retained — [`crate::collaborators::TableSchema`]
/// does not model them.
fn parse_column_list(body: &str) -> Result<Vec<(String, String)>> {
    let mut columns = Vec::new();
    for part in split_top_level_commas(body) {
        let mut tokens = part.split_whitespace();
        let name = tokens.next().ok_or_else(|| GatewayError::malformed_field("column name"))?.to_owned();
        let type_tag = tokens.next().ok_or_else(|| GatewayError::malformed_field("column type"))?.to_owned();
        columns.push((name, type_tag));
    }
    if columns.is_empty() {
        return Err(GatewayError::malformed_field("column list"));
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TableSchema;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeMetadata;

    #[async_trait]
    impl MetadataFacade for FakeMetadata {
        async fn list_tables(&self, _principal: &Principal) -> Result<Vec<String>> {
            Ok(vec!["orders".to_owned(), "customers".to_owned()])
        }

        async fn table_schema(&self, table_name: &str) -> Result<Option<TableSchema>> {
            if table_name == "orders" {
                Ok(Some(TableSchema {
                    name: "orders".to_owned(),
                    columns: vec![("id".to_owned(), "BIGINT".to_owned())],
                }))
            } else {
                Ok(None)
            }
        }
    }

    #[derive(Default)]
    struct RecordingStorage {
        created: Mutex<Vec<(String, Vec<(String, String)>)>>,
        dropped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StorageFacade for RecordingStorage {
        async fn ingest(&self, _block: &crate::codec::DataBlock) -> Result<u64> {
            Ok(0)
        }

        async fn create_table(&self, table_name: &str, columns: Vec<(String, String)>) -> Result<()> {
            self.created.lock().unwrap().push((table_name.to_owned(), columns));
            Ok(())
        }

        async fn remove_table(&self, table_name: &str) -> Result<()> {
            self.dropped.lock().unwrap().push(table_name.to_owned());
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
    async fn show_databases_reports_the_two_builtin_namespaces() {
        let result = try_handle("SHOW DATABASES", &principal(), &FakeMetadata, None).await.unwrap().unwrap();
        assert_eq!(result.columns[0].values, vec!["default".to_owned(), "system".to_owned()]);
    }

    #[async_std::test]
    async fn show_tables_lists_every_table() {
        let result = try_handle("SHOW TABLES", &principal(), &FakeMetadata, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.columns[0].values, vec!["orders", "customers"]);
    }

    #[async_std::test]
    async fn show_columns_from_known_table() {
        let result = try_handle("SHOW COLUMNS FROM orders", &principal(), &FakeMetadata, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.columns[0].values, vec!["id"]);
    }

    #[async_std::test]
    async fn show_columns_from_accepts_a_trailing_database_qualifier() {
        let result = try_handle("SHOW COLUMNS FROM orders FROM default", &principal(), &FakeMetadata, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.columns[0].values, vec!["id"]);
    }

    #[async_std::test]
    async fn show_columns_from_unknown_table_is_an_error() {
        let result = try_handle("SHOW COLUMNS FROM ghost", &principal(), &FakeMetadata, None).await;
        assert!(result.is_err());
    }

    #[async_std::test]
    async fn describe_reports_field_type_and_placeholder_columns() {
        let result = try_handle("DESCRIBE orders", &principal(), &FakeMetadata, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.columns.len(), 6);
        assert_eq!(result.columns[0].name, "Field");
        assert_eq!(result.columns[0].values, vec!["id"]);
        assert_eq!(result.columns[1].values, vec!["BIGINT"]);
        assert_eq!(result.columns[2].values, vec!["YES"]);
    }

    #[async_std::test]
    async fn describe_unknown_table_is_an_error() {
        let result = try_handle("DESCRIBE ghost", &principal(), &FakeMetadata, None).await;
        assert!(result.is_err());
    }

    #[async_std::test]
    async fn literal_only_select_of_an_integer_is_answered_locally() {
        let result = try_handle("SELECT 1", &principal(), &FakeMetadata, None).await.unwrap().unwrap();
        assert_eq!(result.columns[0].name, "result");
        assert_eq!(result.columns[0].type_tag, "UInt32");
        assert_eq!(result.columns[0].values, vec!["1".to_owned()]);
    }

    #[async_std::test]
    async fn literal_only_select_of_a_string_is_answered_locally() {
        let result = try_handle("SELECT 'x'", &principal(), &FakeMetadata, None).await.unwrap().unwrap();
        assert_eq!(result.columns[0].type_tag, "String");
        assert_eq!(result.columns[0].values, vec!["x".to_owned()]);
    }

    #[async_std::test]
    async fn select_from_a_table_is_not_handled_as_a_literal() {
        let result = try_handle("SELECT * FROM t", &principal(), &FakeMetadata, None).await.unwrap();
        assert!(result.is_none());
    }

    #[async_std::test]
    async fn create_table_reaches_the_storage_facade_when_one_is_wired() {
        let storage = RecordingStorage::default();
        let result = try_handle(
            "CREATE TABLE orders (id int NOT NULL, name varchar(32))",
            &principal(),
            &FakeMetadata,
            Some(&storage),
        )
        .await
        .unwrap();
        assert!(result.is_some());

        let created = storage.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "orders");
        assert_eq!(
            created[0].1,
            vec![("id".to_owned(), "int".to_owned()), ("name".to_owned(), "varchar".to_owned())]
        );
    }

    #[async_std::test]
    async fn create_table_falls_through_to_the_engine_when_no_storage_facade_is_wired() {
        let result = try_handle("CREATE TABLE orders (id int)", &principal(), &FakeMetadata, None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[async_std::test]
    async fn drop_table_reaches_the_storage_facade_when_one_is_wired() {
        let storage = RecordingStorage::default();
        let result = try_handle("DROP TABLE orders", &principal(), &FakeMetadata, Some(&storage))
            .await
            .unwrap();
        assert!(result.is_some());
        assert_eq!(storage.dropped.lock().unwrap().as_slice(), ["orders".to_owned()]);
    }

    #[async_std::test]
    async fn unrecognized_statement_falls_through() {
        let result = try_handle("UPDATE t SET x = 1", &principal(), &FakeMetadata, None).await.unwrap();
        assert!(result.is_none());
    }
}
