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

//! The native binary endpoint: the `Hello`/`Query`/`Data`/`Cancel`/`Ping`
//! signal set driven through the per-connection state machine, per
//! `spec.md` §4.5.

use crate::codec::{ClientSignal, ColumnFrame, Codec, ProfileInfo as WireProfileInfo, ServerSignal};
use crate::collaborators::{AuthProvider, StorageFacade};
use crate::context::{ConnectionContext, ConnectionState, Principal};
use crate::dispatch::Dispatcher;
use crate::endpoints::read_next_signal;
use crate::error::{GatewayError, Result};
use crate::middleware::MiddlewareChain;
use crate::state_machine::ConnectionStateMachine;
use futures_lite::{AsyncRead, AsyncWrite};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const PROTOCOL_MAJOR: u64 = 1;
const PROTOCOL_MINOR: u64 = 0;
const PROTOCOL_REVISION: u64 = 54_460;
const SERVER_NAME: &str = "lakehouse-gateway";

/// Drives one native-endpoint connection end to end.
pub struct NativeConnectionHandler {
    codec: Arc<Codec>,
    middleware: Arc<MiddlewareChain>,
    dispatcher: Arc<Dispatcher>,
    auth_provider: Arc<dyn AuthProvider>,
    storage: Arc<dyn StorageFacade>,
    auth_enabled: bool,
    read_deadline: Duration,
}

impl NativeConnectionHandler {
    /// Builds a handler sharing the supervisor's collaborators.
    pub fn new(
        codec: Arc<Codec>,
        middleware: Arc<MiddlewareChain>,
        dispatcher: Arc<Dispatcher>,
        auth_provider: Arc<dyn AuthProvider>,
        storage: Arc<dyn StorageFacade>,
        auth_enabled: bool,
        read_deadline: Duration,
    ) -> Self {
        NativeConnectionHandler {
            codec,
            middleware,
            dispatcher,
            auth_provider,
            storage,
            auth_enabled,
            read_deadline,
        }
    }

    /// Drives `stream` until the connection closes, the client disconnects,
    /// or `shutdown` is observed.
    pub async fn handle<RW>(&self, mut stream: RW, peer_address: String, shutdown: &AtomicBool) -> Result<()>
    where
        RW: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut context = ConnectionContext::new(peer_address);
        let mut machine = ConnectionStateMachine::new();

        if let Err(error) = self.middleware.on_connect(&mut context).await {
            self.send_exception(&mut stream, &error).await?;
            return Err(error);
        }

        let result = self.drive(&mut stream, &mut context, &mut machine, shutdown).await;

        self.middleware.on_disconnect(&context).await;
        if let Err(error) = &result {
            self.middleware.on_error(&mut context, error).await;
            let _ = self.send_exception(&mut stream, error).await;
        }
        result
    }

    async fn drive<RW>(
        &self,
        stream: &mut RW,
        context: &mut ConnectionContext,
        machine: &mut ConnectionStateMachine,
        shutdown: &AtomicBool,
    ) -> Result<()>
    where
        RW: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            let signal = match read_next_signal(stream, &self.codec, self.read_deadline, shutdown).await {
                Ok(Some(signal)) => signal,
                Ok(None) => {
                    machine.transition(ConnectionState::Closing, "Shutdown")?;
                    machine.transition(ConnectionState::Closed, "Shutdown")?;
                    return Ok(());
                }
                Err(error) => return Err(error),
            };

            if let Err(error) = self.middleware.on_read(context, &signal).await {
                if error.is_fatal() {
                    return Err(error);
                }
                self.send_exception(stream, &error).await?;
                continue;
            }

            match signal {
                ClientSignal::Hello {
                    client_name,
                    major,
                    minor,
                    revision,
                } => {
                    self.handle_hello(stream, context, machine, client_name, major, minor, revision)
                        .await?;
                }
                ClientSignal::Ping => {
                    self.handle_ping(stream, context).await?;
                }
                ClientSignal::Query { sql } => {
                    let result = self.handle_query(stream, context, machine, sql).await;
                    self.finish_signal(stream, result).await?;
                }
                ClientSignal::Cancel { query_id } => {
                    let result = self.handle_cancel(context, query_id).await;
                    self.finish_signal(stream, result).await?;
                }
                ClientSignal::Data { block } => {
                    let result = self.handle_data(stream, context, machine, block).await;
                    self.finish_signal(stream, result).await?;
                }
            }
        }
    }

    async fn handle_hello<RW>(
        &self,
        stream: &mut RW,
        context: &mut ConnectionContext,
        machine: &mut ConnectionStateMachine,
        client_name: String,
        _major: u64,
        _minor: u64,
        _revision: u64,
    ) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        machine.transition(ConnectionState::Authenticating, "ClientHello")?;

        let principal = if self.auth_enabled {
            match self.auth_provider.authenticate(&client_name, "").await {
                Ok(principal) => principal,
                Err(error) => return Err(error),
            }
        } else {
            Principal {
                username: client_name,
                permissions: vec!["select".to_owned(), "insert".to_owned(), "admin".to_owned()],
            }
        };
        context.principal = Some(principal);
        machine.transition(ConnectionState::Idle, "AuthComplete")?;

        let hello = ServerSignal::Hello {
            server_name: SERVER_NAME.to_owned(),
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            revision: PROTOCOL_REVISION,
            timezone: "UTC".to_owned(),
            display_name: SERVER_NAME.to_owned(),
            patch: 0,
        };
        self.send(stream, context, &hello).await
    }

    async fn handle_ping<RW>(&self, stream: &mut RW, context: &mut ConnectionContext) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        let now_millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.send(stream, context, &ServerSignal::Pong { timestamp_millis: now_millis })
            .await
    }

    async fn handle_query<RW>(
        &self,
        stream: &mut RW,
        context: &mut ConnectionContext,
        machine: &mut ConnectionStateMachine,
        sql: String,
    ) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        machine.transition(ConnectionState::Querying, "ClientQuery")?;

        if let Err(error) = self.middleware.on_query(context, &sql).await {
            machine.transition(ConnectionState::Idle, "QueryRejected")?;
            return Err(error);
        }

        let principal = context
            .principal
            .clone()
            .ok_or_else(GatewayError::unauthenticated)?;

        let dispatch_result = self.dispatcher.dispatch(&sql, &principal).await;
        context.queries_served += 1;

        let result = match dispatch_result {
            Ok(result) => result,
            Err(error) => {
                machine.transition(ConnectionState::Idle, "QueryFailed")?;
                return Err(error);
            }
        };

        machine.transition(ConnectionState::Streaming, "ServerData")?;

        let mut total_rows: u64 = 0;
        for column in &result.columns {
            let frame = ColumnFrame {
                name: column.name.clone(),
                type_tag: column.type_tag.clone(),
                row_count: column.values.len() as u64,
                joined_values: column.values.join(","),
            };
            total_rows = total_rows.max(column.values.len() as u64);
            self.send(stream, context, &ServerSignal::Data(frame)).await?;
        }

        self.send(
            stream,
            context,
            &ServerSignal::ProfileInfo(WireProfileInfo {
                rows: total_rows,
                blocks: if result.columns.is_empty() { 0 } else { 1 },
                bytes: 0,
            }),
        )
        .await?;
        self.send(stream, context, &ServerSignal::EndOfStream).await?;

        machine.transition(ConnectionState::Idle, "ServerEndOfStream")?;
        Ok(())
    }

    /// Bulk-ingests `block` via the storage facade and acknowledges with an
    /// `EndOfStream`, the same way a query's result stream is closed. Does
    /// not move the state machine through Querying/Streaming; ingestion is
    /// not a query.
    async fn handle_data<RW>(
        &self,
        stream: &mut RW,
        context: &mut ConnectionContext,
        machine: &mut ConnectionStateMachine,
        block: crate::codec::DataBlock,
    ) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        if context.principal.is_none() {
            return Err(GatewayError::unauthenticated());
        }
        if machine.state() != ConnectionState::Idle {
            return Err(GatewayError::unexpected_signal(machine.state().name(), "ClientData"));
        }

        self.storage.ingest(&block).await?;
        self.send(stream, context, &ServerSignal::EndOfStream).await
    }

    async fn handle_cancel(&self, context: &mut ConnectionContext, query_id: String) -> Result<()> {
        self.dispatcher.cancel(&query_id).await?;
        context.active_query_id = None;
        Ok(())
    }

    /// Reports a non-fatal signal-handling failure to the client and lets
    /// the connection continue; a fatal one (framing, protocol, resource)
    /// propagates and closes the connection, matching the `on_read` handling
    /// above.
    async fn finish_signal<RW>(&self, stream: &mut RW, result: Result<()>) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        if let Err(error) = result {
            if error.is_fatal() {
                return Err(error);
            }
            self.send_exception(stream, &error).await?;
        }
        Ok(())
    }

    async fn send<RW>(&self, stream: &mut RW, context: &mut ConnectionContext, signal: &ServerSignal) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        self.middleware.on_write(context, signal).await?;
        context.touch();
        self.codec.write_server(stream, signal).await
    }

    async fn send_exception<RW>(&self, stream: &mut RW, error: &GatewayError) -> Result<()>
    where
        RW: AsyncWrite + Unpin,
    {
        let exception = ServerSignal::Exception {
            code: error.code().to_owned(),
            message: error.to_string(),
            hint: error.hint().map(str::to_owned),
        };
        self.codec.write_server(stream, &exception).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Registry;
    use crate::collaborators::{AllowAllAuthProvider, ExecutionEngine, MetadataFacade, QueryResult, ResultColumn, TableSchema};
    use async_trait::async_trait;

    struct EchoEngine;

    #[async_trait]
    impl ExecutionEngine for EchoEngine {
        async fn execute(&self, _sql: &str, _principal: &Principal) -> Result<QueryResult> {
            Ok(QueryResult {
                columns: vec![ResultColumn {
                    name: "result".to_owned(),
                    type_tag: "UInt32".to_owned(),
                    values: vec!["1".to_owned()],
                }],
                rows_affected: 0,
            })
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

    struct CountingStorage;

    #[async_trait]
    impl StorageFacade for CountingStorage {
        async fn ingest(&self, block: &crate::codec::DataBlock) -> Result<u64> {
            Ok(block.rows.len() as u64)
        }

        async fn create_table(&self, _table_name: &str, _columns: Vec<(String, String)>) -> Result<()> {
            Ok(())
        }

        async fn remove_table(&self, _table_name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn handler() -> NativeConnectionHandler {
        let codec = Arc::new(Codec::new(Arc::new(Registry::with_builtin_signals().unwrap()), 1024 * 1024));
        let middleware = Arc::new(MiddlewareChain::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(EchoEngine), Arc::new(EmptyMetadata)));
        NativeConnectionHandler::new(
            codec,
            middleware,
            dispatcher,
            Arc::new(AllowAllAuthProvider),
            Arc::new(CountingStorage),
            true,
            Duration::from_millis(50),
        )
    }

    #[async_std::test]
    async fn hello_then_query_round_trip_produces_hello_data_profile_and_eos() {
        let handler = handler();
        let mut client_to_server = Vec::new();
        handler
            .codec
            .write_client(
                &mut client_to_server,
                &ClientSignal::Hello {
                    client_name: "probe".to_owned(),
                    major: 1,
                    minor: 0,
                    revision: 54460,
                },
            )
            .await
            .unwrap();
        handler
            .codec
            .write_client(
                &mut client_to_server,
                &ClientSignal::Query {
                    sql: "SELECT 1".to_owned(),
                },
            )
            .await
            .unwrap();

        let mut stream = futures_lite::io::Cursor::new(client_to_server);
        let mut reply = Vec::new();
        let shutdown = AtomicBool::new(false);

        let mut context = ConnectionContext::new("test");
        let mut machine = ConnectionStateMachine::new();
        handler.middleware.on_connect(&mut context).await.unwrap();

        // Drive exactly two signals (Hello, Query) then stop.
        for _ in 0..2 {
            let signal = read_next_signal(&mut stream, &handler.codec, handler.read_deadline, &shutdown)
                .await
                .unwrap()
                .unwrap();
            match signal {
                ClientSignal::Hello {
                    client_name,
                    major,
                    minor,
                    revision,
                } => {
                    handler
                        .handle_hello(&mut reply, &mut context, &mut machine, client_name, major, minor, revision)
                        .await
                        .unwrap();
                }
                ClientSignal::Query { sql } => {
                    handler
                        .handle_query(&mut reply, &mut context, &mut machine, sql)
                        .await
                        .unwrap();
                }
                _ => unreachable!(),
            }
        }

        let mut reply_cursor = futures_lite::io::Cursor::new(reply);
        let hello = handler.codec.read_server(&mut reply_cursor).await.unwrap();
        assert!(matches!(hello, ServerSignal::Hello { .. }));
        let data = handler.codec.read_server(&mut reply_cursor).await.unwrap();
        assert!(matches!(data, ServerSignal::Data(_)));
        let profile = handler.codec.read_server(&mut reply_cursor).await.unwrap();
        assert!(matches!(profile, ServerSignal::ProfileInfo(_)));
        let eos = handler.codec.read_server(&mut reply_cursor).await.unwrap();
        assert!(matches!(eos, ServerSignal::EndOfStream));
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[async_std::test]
    async fn data_block_is_ingested_and_acknowledged_with_end_of_stream() {
        let handler = handler();
        let mut context = ConnectionContext::new("test");
        context.principal = Some(Principal {
            username: "probe".to_owned(),
            permissions: vec!["insert".to_owned()],
        });
        let mut machine = ConnectionStateMachine::new();

        let block = crate::codec::DataBlock::new(
            "t".to_owned(),
            vec!["id".to_owned()],
            vec!["UInt32".to_owned()],
            vec![vec!["1".to_owned()]],
        )
        .unwrap();

        let mut reply = Vec::new();
        handler.handle_data(&mut reply, &mut context, &mut machine, block).await.unwrap();

        let mut reply_cursor = futures_lite::io::Cursor::new(reply);
        let eos = handler.codec.read_server(&mut reply_cursor).await.unwrap();
        assert!(matches!(eos, ServerSignal::EndOfStream));
    }

    #[async_std::test]
    async fn data_block_without_a_principal_is_rejected() {
        let handler = handler();
        let mut context = ConnectionContext::new("test");
        let mut machine = ConnectionStateMachine::new();
        let block = crate::codec::DataBlock::new("t".to_owned(), vec![], vec![], vec![]).unwrap();
        let mut reply = Vec::new();
        let error = handler.handle_data(&mut reply, &mut context, &mut machine, block).await.unwrap_err();
        assert_eq!(error, GatewayError::unauthenticated());
    }
}
