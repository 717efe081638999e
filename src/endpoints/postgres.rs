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

//! The PostgreSQL-compatible endpoint: wire protocol v3 startup, the
//! simple query subprotocol, and `ErrorResponse` translation of
//! [`GatewayError`], per `spec.md` §4.5.

use crate::collaborators::QueryResult;
use crate::context::{ConnectionContext, ConnectionState, Principal};
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::middleware::MiddlewareChain;
use crate::state_machine::ConnectionStateMachine;
use byteorder::{ByteOrder, NetworkEndian};
use futures_lite::{future, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PROTOCOL_VERSION_3: u32 = 196_608;
const SSL_REQUEST_CODE: u32 = 80_877_103;
const GSS_REQUEST_CODE: u32 = 80_877_104;

fn read_cstr(buf: &[u8]) -> Result<(String, usize)> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| GatewayError::malformed_field("null-terminated string"))?;
    let s = String::from_utf8(buf[..end].to_vec()).map_err(|_| GatewayError::malformed_field("utf8 string"))?;
    Ok((s, end + 1))
}

async fn write_ssl_reject<W>(sink: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(b"N").await?;
    Ok(())
}

/// Indicates whether the handshake requested SSL, so the caller can answer
/// before the real startup packet is read.
async fn peek_and_reject_ssl<RW>(stream: &mut RW) -> Result<Vec<(String, String)>>
where
    RW: AsyncRead + AsyncWrite + Unpin,
{
    // Startup negotiation can loop through any number of SSLRequest/GSSENCRequest
    // probes before the real startup packet arrives; reject each.
    loop {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| GatewayError::truncated())?;
        let length = NetworkEndian::read_u32(&len_buf);
        if length < 8 {
            return Err(GatewayError::truncated());
        }
        let mut rest = vec![0u8; (length - 4) as usize];
        stream.read_exact(&mut rest).await.map_err(|_| GatewayError::truncated())?;
        let code = NetworkEndian::read_u32(&rest[0..4]);

        if code == SSL_REQUEST_CODE || code == GSS_REQUEST_CODE {
            write_ssl_reject(stream).await?;
            continue;
        }
        if code != PROTOCOL_VERSION_3 {
            return Err(GatewayError::malformed_field("startup protocol version"));
        }

        let mut params = Vec::new();
        let mut cursor = &rest[4..];
        loop {
            let (key, advance) = read_cstr(cursor)?;
            if key.is_empty() {
                break;
            }
            cursor = &cursor[advance..];
            let (value, advance) = read_cstr(cursor)?;
            cursor = &cursor[advance..];
            params.push((key, value));
        }
        return Ok(params);
    }
}

async fn write_message<W>(sink: &mut W, tag: u8, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = Vec::with_capacity(5 + payload.len());
    framed.push(tag);
    framed.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    sink.write_all(&framed).await?;
    Ok(())
}

async fn read_message<R>(source: &mut R) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut tag_buf = [0u8; 1];
    source
        .read_exact(&mut tag_buf)
        .await
        .map_err(|_| GatewayError::truncated())?;
    let mut len_buf = [0u8; 4];
    source
        .read_exact(&mut len_buf)
        .await
        .map_err(|_| GatewayError::truncated())?;
    let length = NetworkEndian::read_u32(&len_buf);
    if length < 4 {
        return Err(GatewayError::truncated());
    }
    let mut payload = vec![0u8; (length - 4) as usize];
    if !payload.is_empty() {
        source
            .read_exact(&mut payload)
            .await
            .map_err(|_| GatewayError::truncated())?;
    }
    Ok((tag_buf[0], payload))
}

fn cstr(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Races `read_message` against a `read_deadline` timer so an idle
/// connection still notices `shutdown` going true, the same way
/// [`crate::endpoints::read_next_signal`] does for the native endpoint.
/// Returns `Ok(None)` once `shutdown` is observed.
async fn read_message_or_shutdown<R>(
    source: &mut R,
    read_deadline: Duration,
    shutdown: &AtomicBool,
) -> Result<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let read = async { Ok(Some(read_message(source).await?)) };
        let timeout = async {
            async_io::Timer::after(read_deadline).await;
            Ok(None)
        };
        match future::or(read, timeout).await {
            Ok(Some(message)) => return Ok(Some(message)),
            Ok(None) => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(None);
                }
            }
            Err(error) => return Err(error),
        }
    }
}

/// Drives one PostgreSQL-compatible connection end to end.
pub struct PostgresConnectionHandler {
    middleware: Arc<MiddlewareChain>,
    dispatcher: Arc<Dispatcher>,
    read_deadline: Duration,
}

impl PostgresConnectionHandler {
    /// Builds a handler sharing the supervisor's collaborators.
    pub fn new(middleware: Arc<MiddlewareChain>, dispatcher: Arc<Dispatcher>, read_deadline: Duration) -> Self {
        PostgresConnectionHandler {
            middleware,
            dispatcher,
            read_deadline,
        }
    }

    /// Drives `stream` until the client terminates the connection or
    /// `shutdown` is observed.
    pub async fn handle<RW>(&self, mut stream: RW, peer_address: String, shutdown: &AtomicBool) -> Result<()>
    where
        RW: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut context = ConnectionContext::new(peer_address);
        let mut machine = ConnectionStateMachine::new();

        if let Err(error) = self.middleware.on_connect(&mut context).await {
            self.send_error(&mut stream, &error).await?;
            return Err(error);
        }

        let result = self.drive(&mut stream, &mut context, &mut machine, shutdown).await;

        self.middleware.on_disconnect(&context).await;
        if let Err(error) = &result {
            self.middleware.on_error(&mut context, error).await;
            let _ = self.send_error(&mut stream, error).await;
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
        machine.transition(ConnectionState::Authenticating, "StartupPacket")?;
        let params = peek_and_reject_ssl(stream).await;
        let params = match params {
            Ok(params) => params,
            Err(error) => return Err(error),
        };
        let username = params
            .iter()
            .find(|(key, _)| key == "user")
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| "anonymous".to_owned());

        context.principal = Some(Principal {
            username,
            permissions: vec!["select".to_owned(), "insert".to_owned()],
        });
        machine.transition(ConnectionState::Idle, "AuthComplete")?;

        write_message(stream, b'R', &0u32.to_be_bytes()).await?;
        write_message(stream, b'Z', b"I").await?;

        loop {
            let message = match read_message_or_shutdown(stream, self.read_deadline, shutdown).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    machine.transition(ConnectionState::Closing, "Shutdown")?;
                    machine.transition(ConnectionState::Closed, "Shutdown")?;
                    return Ok(());
                }
                Err(error) => return Err(error),
            };

            match message {
                (b'Q', payload) => {
                    let (sql, _) = read_cstr(&payload)?;
                    self.handle_query(stream, context, machine, sql).await?;
                }
                (b'X', _) => {
                    machine.transition(ConnectionState::Closing, "Terminate")?;
                    machine.transition(ConnectionState::Closed, "Terminate")?;
                    return Ok(());
                }
                (other, _) => {
                    let error = GatewayError::unknown_kind(other);
                    self.send_error(stream, &error).await?;
                }
            }
        }
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
        machine.transition(ConnectionState::Querying, "SimpleQuery")?;

        if let Err(error) = self.middleware.on_query(context, &sql).await {
            machine.transition(ConnectionState::Idle, "QueryRejected")?;
            self.send_error(stream, &error).await?;
            write_message(stream, b'Z', b"I").await?;
            return Ok(());
        }

        let principal = context.principal.clone().ok_or_else(GatewayError::unauthenticated)?;
        let dispatched = self.dispatcher.dispatch(&sql, &principal).await;
        context.queries_served += 1;

        match dispatched {
            Ok(result) => {
                machine.transition(ConnectionState::Streaming, "RowDescription")?;
                self.send_result(stream, &result).await?;
                machine.transition(ConnectionState::Idle, "CommandComplete")?;
            }
            Err(error) => {
                machine.transition(ConnectionState::Idle, "QueryFailed")?;
                self.send_error(stream, &error).await?;
            }
        }

        write_message(stream, b'Z', b"I").await?;
        Ok(())
    }

    async fn send_result<W>(&self, sink: &mut W, result: &QueryResult) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if !result.columns.is_empty() {
            let mut row_description = Vec::new();
            row_description.extend_from_slice(&(result.columns.len() as u16).to_be_bytes());
            for column in &result.columns {
                row_description.extend_from_slice(&cstr(&column.name));
                row_description.extend_from_slice(&0i32.to_be_bytes()); // table oid
                row_description.extend_from_slice(&0i16.to_be_bytes()); // column attnum
                row_description.extend_from_slice(&25i32.to_be_bytes()); // type oid: text
                row_description.extend_from_slice(&(-1i16).to_be_bytes()); // type len
                row_description.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
                row_description.extend_from_slice(&0i16.to_be_bytes()); // format: text
            }
            write_message(sink, b'T', &row_description).await?;

            let row_count = result.columns.iter().map(|c| c.values.len()).max().unwrap_or(0);
            for row_index in 0..row_count {
                let mut data_row = Vec::new();
                data_row.extend_from_slice(&(result.columns.len() as u16).to_be_bytes());
                for column in &result.columns {
                    match column.values.get(row_index) {
                        Some(value) => {
                            data_row.extend_from_slice(&(value.len() as i32).to_be_bytes());
                            data_row.extend_from_slice(value.as_bytes());
                        }
                        None => data_row.extend_from_slice(&(-1i32).to_be_bytes()),
                    }
                }
                write_message(sink, b'D', &data_row).await?;
            }
            write_message(sink, b'C', &cstr(&format!("SELECT {}", row_count))).await?;
        } else {
            write_message(sink, b'C', &cstr(&format!("UPDATE {}", result.rows_affected))).await?;
        }
        Ok(())
    }

    async fn send_error<W>(&self, sink: &mut W, error: &GatewayError) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut body = Vec::new();
        body.push(b'S');
        body.extend_from_slice(&cstr(error.severity().into()));
        body.push(b'C');
        body.extend_from_slice(&cstr(error.code()));
        body.push(b'M');
        body.extend_from_slice(&cstr(&error.to_string()));
        if let Some(hint) = error.hint() {
            body.push(b'H');
            body.extend_from_slice(&cstr(hint));
        }
        body.push(0);
        write_message(sink, b'E', &body).await
    }
}
