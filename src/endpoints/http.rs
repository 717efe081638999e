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

//! The HTTP endpoint: a status/health stub, not on the critical data path,
//! per `spec.md` §4.5.

use crate::error::{GatewayError, Result};
use crate::middleware::pool::ConnectionPoolMiddleware;
use futures_lite::io::{AsyncBufReadExt, BufReader};
use futures_lite::{AsyncRead, AsyncWrite, AsyncWriteExt};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusBody {
    admitted_connections: usize,
}

/// Answers `GET /health` and `GET /status` with a small JSON body; every
/// other path gets a 404. Reads exactly one request line and ignores
/// headers and body, which is all a liveness/status stub needs.
pub struct HttpConnectionHandler {
    pool: Arc<ConnectionPoolMiddleware>,
}

impl HttpConnectionHandler {
    /// Builds a handler reporting on `pool`'s admission state.
    pub fn new(pool: Arc<ConnectionPoolMiddleware>) -> Self {
        HttpConnectionHandler { pool }
    }

    /// Serves exactly one request on `stream`, then closes it (HTTP/1.0
    /// style, adequate for a status stub).
    pub async fn handle<RW>(&self, stream: RW) -> Result<()>
    where
        RW: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .map_err(|_| GatewayError::truncated())?;

        let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_owned();

        // Drain headers without interpreting them; a status stub has no use
        // for them and no body is ever expected on these routes.
        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await.map_err(|_| GatewayError::truncated())?;
            if bytes_read == 0 || line == "\r\n" || line == "\n" {
                break;
            }
        }

        let stream = reader.into_inner();
        match path.as_str() {
            "/health" => {
                let body = serde_json::to_vec(&HealthBody { status: "ok" }).map_err(|err| GatewayError::io(err.to_string()))?;
                write_response(stream, 200, "OK", &body).await
            }
            "/status" => {
                let body = serde_json::to_vec(&StatusBody {
                    admitted_connections: self.pool.admitted_count(),
                })
                .map_err(|err| GatewayError::io(err.to_string()))?;
                write_response(stream, 200, "OK", &body).await
            }
            _ => write_response(stream, 404, "Not Found", b"{}").await,
        }
    }
}

async fn write_response<W>(mut sink: W, status: u16, reason: &str, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    sink.write_all(header.as_bytes()).await?;
    sink.write_all(body).await?;
    sink.flush().await?;
    Ok(())
}
