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

//! End-to-end scenarios driven against the dispatcher and codec directly
//! (no real sockets), covering the connection lifecycle a real client would
//! observe talking to either endpoint.

use async_trait::async_trait;
use gateway::codec::{ClientSignal, DataBlock};
use gateway::collaborators::{ExecutionEngine, MetadataFacade, QueryResult, ResultColumn, StorageFacade, TableSchema};
use gateway::context::Principal;
use gateway::error::{GatewayError, Result};
use gateway::test_helpers::pg_frontend;
use std::collections::HashMap;
use std::sync::Arc;

/// A small in-memory engine covering the statements the end-to-end
/// scenarios exercise: `SELECT 1`, `SELECT * FROM nope`, and a
/// `CREATE TABLE` / `INSERT` / `SELECT` round trip against one table.
struct ScenarioEngine {
    tables: async_mutex::Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl ScenarioEngine {
    fn new() -> Self {
        ScenarioEngine {
            tables: async_mutex::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ExecutionEngine for ScenarioEngine {
    async fn execute(&self, sql: &str, _principal: &Principal) -> Result<QueryResult> {
        let trimmed = sql.trim().trim_end_matches(';');
        let upper = trimmed.to_uppercase();

        if upper == "SELECT 1" {
            return Ok(QueryResult {
                columns: vec![ResultColumn {
                    name: "result".to_owned(),
                    type_tag: "UInt32".to_owned(),
                    values: vec!["1".to_owned()],
                }],
                rows_affected: 0,
            });
        }

        if upper.contains("FROM NOPE") {
            return Err(GatewayError::table_not_found("nope"));
        }

        if upper.starts_with("CREATE TABLE") {
            let rest = trimmed["CREATE TABLE".len()..].trim();
            let name = rest.split(|c: char| c.is_whitespace() || c == '(').next().unwrap_or("").to_owned();
            self.tables.lock().await.entry(name).or_default();
            return Ok(QueryResult::default());
        }

        if upper.starts_with("INSERT INTO") {
            let rest = trimmed["INSERT INTO".len()..].trim();
            let name = rest.split(|c: char| c.is_whitespace() || c == '(').next().unwrap_or("").to_owned();
            let values_start = trimmed.find('(').ok_or_else(|| GatewayError::malformed_field("values"))?;
            let values = trimmed[values_start + 1..trimmed.len() - 1]
                .split(',')
                .map(|v| v.trim().trim_matches('\'').to_owned())
                .collect::<Vec<_>>();
            self.tables.lock().await.entry(name).or_default().push(values);
            return Ok(QueryResult {
                columns: Vec::new(),
                rows_affected: 1,
            });
        }

        if upper.starts_with("SELECT * FROM") {
            let name = trimmed["SELECT * FROM".len()..].trim().to_owned();
            let rows = self.tables.lock().await.get(&name).cloned().unwrap_or_default();
            let id_values = rows.iter().map(|r| r[0].clone()).collect();
            let name_values = rows.iter().map(|r| r[1].clone()).collect();
            return Ok(QueryResult {
                columns: vec![
                    ResultColumn {
                        name: "id".to_owned(),
                        type_tag: "Int32".to_owned(),
                        values: id_values,
                    },
                    ResultColumn {
                        name: "name".to_owned(),
                        type_tag: "String".to_owned(),
                        values: name_values,
                    },
                ],
                rows_affected: 0,
            });
        }

        Err(GatewayError::unsupported_statement(trimmed.to_owned()))
    }

    async fn cancel(&self, _query_id: &str) -> Result<()> {
        Ok(())
    }
}

struct EmptyMetadata;

#[async_trait]
impl MetadataFacade for EmptyMetadata {
    async fn list_tables(&self, _principal: &Principal) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn table_schema(&self, _table_name: &str) -> Result<Option<TableSchema>> {
        Ok(None)
    }
}

struct NullStorage;

#[async_trait]
impl StorageFacade for NullStorage {
    async fn ingest(&self, block: &DataBlock) -> Result<u64> {
        Ok(block.rows.len() as u64)
    }

    async fn create_table(&self, _table_name: &str, _columns: Vec<(String, String)>) -> Result<()> {
        Ok(())
    }

    async fn remove_table(&self, _table_name: &str) -> Result<()> {
        Ok(())
    }
}

fn principal() -> Principal {
    Principal {
        username: "probe".to_owned(),
        permissions: vec!["select".to_owned(), "insert".to_owned(), "admin".to_owned()],
    }
}

#[async_std::test]
async fn unknown_table_select_reports_table_not_found_with_a_hint() {
    let dispatcher = gateway::dispatch::Dispatcher::new(Arc::new(ScenarioEngine::new()), Arc::new(EmptyMetadata));
    let error = dispatcher.dispatch("SELECT * FROM nope", &principal()).await.unwrap_err();
    assert_eq!(error.code(), "42P01");
    assert!(error.hint().unwrap().contains("SHOW TABLES"));
}

#[async_std::test]
async fn expression_only_select_returns_a_single_row() {
    let dispatcher = gateway::dispatch::Dispatcher::new(Arc::new(ScenarioEngine::new()), Arc::new(EmptyMetadata));
    let result = dispatcher.dispatch("SELECT 1", &principal()).await.unwrap();
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "result");
    assert_eq!(result.columns[0].values, vec!["1".to_owned()]);
}

#[async_std::test]
async fn create_insert_select_round_trip_preserves_insertion_order() {
    let dispatcher = gateway::dispatch::Dispatcher::new(Arc::new(ScenarioEngine::new()), Arc::new(EmptyMetadata));
    let p = principal();

    dispatcher
        .dispatch("CREATE TABLE t (id int, name varchar(32))", &p)
        .await
        .unwrap();
    dispatcher.dispatch("INSERT INTO t VALUES (1, 'a')", &p).await.unwrap();
    dispatcher.dispatch("INSERT INTO t VALUES (2, 'b')", &p).await.unwrap();

    let result = dispatcher.dispatch("SELECT * FROM t", &p).await.unwrap();
    assert_eq!(result.columns[0].values, vec!["1".to_owned(), "2".to_owned()]);
    assert_eq!(result.columns[1].values, vec!["a".to_owned(), "b".to_owned()]);
}

#[async_std::test]
async fn show_tables_is_handled_without_reaching_the_engine() {
    struct PanicsOnExecute;

    #[async_trait]
    impl ExecutionEngine for PanicsOnExecute {
        async fn execute(&self, _sql: &str, _principal: &Principal) -> Result<QueryResult> {
            panic!("native statements must not reach the engine");
        }

        async fn cancel(&self, _query_id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct OneTable;

    #[async_trait]
    impl MetadataFacade for OneTable {
        async fn list_tables(&self, _principal: &Principal) -> Result<Vec<String>> {
            Ok(vec!["t".to_owned()])
        }

        async fn table_schema(&self, _table_name: &str) -> Result<Option<TableSchema>> {
            Ok(None)
        }
    }

    let dispatcher = gateway::dispatch::Dispatcher::new(Arc::new(PanicsOnExecute), Arc::new(OneTable));
    let result = dispatcher.dispatch("SHOW TABLES", &principal()).await.unwrap();
    assert_eq!(result.columns[0].values, vec!["t".to_owned()]);
}

#[async_std::test]
async fn cancel_delegates_to_the_engine_and_a_subsequent_dispatch_still_succeeds() {
    let dispatcher = gateway::dispatch::Dispatcher::new(Arc::new(ScenarioEngine::new()), Arc::new(EmptyMetadata));
    dispatcher.cancel("some-query-id").await.unwrap();
    // the connection is expected to remain usable after a cancel acknowledgment
    dispatcher.dispatch("SELECT 1", &principal()).await.unwrap();
}

#[async_std::test]
async fn bulk_ingest_via_storage_facade_reports_row_count() {
    let storage = NullStorage;
    let block = DataBlock::new(
        "t".to_owned(),
        vec!["id".to_owned(), "name".to_owned()],
        vec!["Int32".to_owned(), "String".to_owned()],
        vec![vec!["1".to_owned(), "a".to_owned()], vec!["2".to_owned(), "b".to_owned()]],
    )
    .unwrap();
    let rows_ingested = storage.ingest(&block).await.unwrap();
    assert_eq!(rows_ingested, 2);
}

#[async_std::test]
async fn postgres_startup_packet_round_trips_through_the_test_helper_builder() {
    let packet = pg_frontend::startup_packet(&[("user", "probe"), ("database", "default")]);
    assert!(packet.len() > 8);
    let terminate = pg_frontend::terminate();
    assert_eq!(terminate, vec![b'X', 0, 0, 0, 4]);
}

#[async_std::test]
async fn fallback_store_through_the_dispatcher_handles_create_insert_select_and_bulk_data() {
    use gateway::dispatch::fallback::FallbackStore;
    use gateway::dispatch::Dispatcher;

    let store = Arc::new(FallbackStore::new());
    let dispatcher = Dispatcher::new(store.clone(), store.clone());
    let p = principal();

    dispatcher
        .dispatch("CREATE TABLE t (id int, name varchar(32))", &p)
        .await
        .unwrap();
    dispatcher.dispatch("INSERT INTO t VALUES (1, 'a')", &p).await.unwrap();

    let block = DataBlock::new(
        "t".to_owned(),
        vec!["id".to_owned(), "name".to_owned()],
        vec!["Int32".to_owned(), "String".to_owned()],
        vec![vec!["2".to_owned(), "b".to_owned()]],
    )
    .unwrap();
    store.ingest(&block).await.unwrap();

    let result = dispatcher.dispatch("SELECT * FROM t", &p).await.unwrap();
    assert_eq!(result.columns[0].values, vec!["1".to_owned(), "2".to_owned()]);
    assert_eq!(result.columns[1].values, vec!["a".to_owned(), "b".to_owned()]);

    let tables = dispatcher.dispatch("SHOW TABLES", &p).await.unwrap();
    assert_eq!(tables.columns[0].values, vec!["t".to_owned()]);
}

/// A byte stream whose read side replays a fixed buffer while its write side
/// accumulates into a handle the test can inspect after the stream has been
/// moved into [`gateway::endpoints::native::NativeConnectionHandler::handle`],
/// which takes ownership of its stream rather than borrowing it.
struct SharedWriteCursor {
    read: futures_lite::io::Cursor<Vec<u8>>,
    write: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl SharedWriteCursor {
    fn new(incoming: Vec<u8>, write: Arc<std::sync::Mutex<Vec<u8>>>) -> Self {
        SharedWriteCursor {
            read: futures_lite::io::Cursor::new(incoming),
            write,
        }
    }
}

impl futures_lite::AsyncRead for SharedWriteCursor {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut [u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.read).poll_read(cx, buf)
    }
}

impl futures_lite::AsyncWrite for SharedWriteCursor {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.write.lock().unwrap().extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_close(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// An idle socket: reads never resolve, writes are accepted and discarded.
/// Simulates a connection sitting between signals so the read-deadline race
/// in `read_next_signal` is the only thing that ever fires.
struct IdleSocket;

impl futures_lite::AsyncRead for IdleSocket {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut [u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::task::Poll::Pending
    }
}

impl futures_lite::AsyncWrite for IdleSocket {
    fn poll_write(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>, buf: &[u8]) -> std::task::Poll<std::io::Result<usize>> {
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_close(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

struct CancellableEngine {
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl ExecutionEngine for CancellableEngine {
    async fn execute(&self, _sql: &str, _principal: &Principal) -> Result<QueryResult> {
        while !self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            async_io::Timer::after(std::time::Duration::from_millis(5)).await;
        }
        Err(GatewayError::engine_failure("cancelled by client"))
    }

    async fn cancel(&self, _query_id: &str) -> Result<()> {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[async_std::test]
async fn cancel_in_flight_reports_the_failure_and_the_connection_stays_usable_for_a_later_ping() {
    use gateway::codec::{Codec, Registry, ServerSignal};
    use gateway::collaborators::AllowAllAuthProvider;
    use gateway::dispatch::Dispatcher;
    use gateway::endpoints::native::NativeConnectionHandler;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    let codec = Arc::new(Codec::new(Arc::new(Registry::with_builtin_signals().unwrap()), 1024 * 1024));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(CancellableEngine {
            cancelled: std::sync::Arc::new(AtomicBool::new(false)),
        }),
        Arc::new(EmptyMetadata),
    ));
    let handler = Arc::new(NativeConnectionHandler::new(
        codec.clone(),
        Arc::new(gateway::middleware::MiddlewareChain::new()),
        dispatcher.clone(),
        Arc::new(AllowAllAuthProvider),
        Arc::new(NullStorage),
        false,
        Duration::from_millis(20),
    ));

    let mut incoming = Vec::new();
    codec
        .write_client(
            &mut incoming,
            &ClientSignal::Hello {
                client_name: "probe".to_owned(),
                major: 1,
                minor: 0,
                revision: 54460,
            },
        )
        .await
        .unwrap();
    codec
        .write_client(&mut incoming, &ClientSignal::Query { sql: "SELECT 1".to_owned() })
        .await
        .unwrap();
    codec.write_client(&mut incoming, &ClientSignal::Ping).await.unwrap();

    let written = Arc::new(std::sync::Mutex::new(Vec::new()));
    let shutdown = Arc::new(AtomicBool::new(false));

    let task = async_std::task::spawn({
        let handler = handler.clone();
        let shutdown = shutdown.clone();
        let written = written.clone();
        async move {
            let stream = SharedWriteCursor::new(incoming, written);
            handler.handle(stream, "peer".to_owned(), &shutdown).await
        }
    });

    // give the handler time to reach the blocked Query before cancelling it
    async_io::Timer::after(Duration::from_millis(40)).await;
    dispatcher.cancel("some-query-id").await.unwrap();

    // the task still ends in error: the pre-loaded bytes run out after the
    // Ping reply and the next read hits EOF, which is a real closed socket,
    // not a cancellation — the cancellation itself did not tear the
    // connection down, which is what this test is checking.
    let _ = task.await;

    let wire = written.lock().unwrap().clone();
    let mut cursor = futures_lite::io::Cursor::new(wire);
    let hello = codec.read_server(&mut cursor).await.unwrap();
    assert!(matches!(hello, ServerSignal::Hello { .. }));
    let exception = codec.read_server(&mut cursor).await.unwrap();
    assert!(matches!(exception, ServerSignal::Exception { .. }), "expected the cancelled query to be reported as an exception");
    let pong = codec.read_server(&mut cursor).await.unwrap();
    assert!(matches!(pong, ServerSignal::Pong { .. }), "connection must still answer a Ping after the cancellation");
}

#[async_std::test]
async fn two_idle_connections_observe_shutdown_and_return_cleanly() {
    use gateway::collaborators::AllowAllAuthProvider;
    use gateway::dispatch::Dispatcher;
    use gateway::endpoints::native::NativeConnectionHandler;
    use gateway::codec::{Codec, Registry};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    fn handler() -> Arc<NativeConnectionHandler> {
        let codec = Arc::new(Codec::new(Arc::new(Registry::with_builtin_signals().unwrap()), 1024));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(ScenarioEngine::new()), Arc::new(EmptyMetadata)));
        Arc::new(NativeConnectionHandler::new(
            codec,
            Arc::new(gateway::middleware::MiddlewareChain::new()),
            dispatcher,
            Arc::new(AllowAllAuthProvider),
            Arc::new(NullStorage),
            false,
            Duration::from_millis(20),
        ))
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    let first = async_std::task::spawn({
        let handler = handler();
        let shutdown = shutdown.clone();
        async move { handler.handle(IdleSocket, "peer-a".to_owned(), &shutdown).await }
    });
    let second = async_std::task::spawn({
        let handler = handler();
        let shutdown = shutdown.clone();
        async move { handler.handle(IdleSocket, "peer-b".to_owned(), &shutdown).await }
    });

    async_io::Timer::after(Duration::from_millis(50)).await;
    shutdown.store(true, Ordering::SeqCst);

    assert!(first.await.is_ok());
    assert!(second.await.is_ok());
    assert!(started.elapsed() < Duration::from_secs(5), "both connections should close promptly after shutdown is flagged");
}

#[async_std::test]
async fn native_hello_signal_round_trips_through_the_codec() {
    use gateway::codec::{Codec, Registry};

    let codec = Codec::new(Arc::new(Registry::with_builtin_signals().unwrap()), 1024);
    let mut wire = Vec::new();
    let hello = ClientSignal::Hello {
        client_name: "probe".to_owned(),
        major: 1,
        minor: 0,
        revision: 54460,
    };
    codec.write_client(&mut wire, &hello).await.unwrap();
    let mut cursor = futures_lite::io::Cursor::new(wire);
    let decoded = codec.read_client(&mut cursor).await.unwrap();
    assert_eq!(decoded, hello);
}
