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

//! Mock byte streams and frontend-message builders for exercising the
//! endpoint handlers and state machine without real sockets, in the spirit
//! of the teacher's `test_helpers` crate. Exposed publicly so embedders can
//! write their own integration tests against this crate's handlers the same
//! way the crate's own `tests/` directory does.

use futures_lite::{AsyncRead, AsyncWrite};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A duplex in-memory byte stream: reads come from a fixed buffer supplied
/// up front (the simulated client's outgoing bytes), writes accumulate into
/// a growable buffer the test can inspect afterwards (the simulated
/// server's replies). Stands in for a real socket in endpoint-handler tests.
pub struct DuplexCursor {
    read: futures_lite::io::Cursor<Vec<u8>>,
    write: Vec<u8>,
}

impl DuplexCursor {
    /// Builds a cursor whose read side replays `incoming` and whose write
    /// side starts empty.
    pub fn new(incoming: Vec<u8>) -> Self {
        DuplexCursor {
            read: futures_lite::io::Cursor::new(incoming),
            write: Vec::new(),
        }
    }

    /// Everything written to this cursor so far.
    pub fn written(&self) -> &[u8] {
        &self.write
    }

    /// Takes ownership of everything written so far, leaving the write side
    /// empty.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.write)
    }
}

impl AsyncRead for DuplexCursor {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.read).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexCursor {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        self.write.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// An `AsyncRead` that never produces data, simulating an idle socket whose
/// only observable event is a deadline timer firing.
pub struct NeverReady;

impl AsyncRead for NeverReady {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        Poll::Pending
    }
}

/// Builders for raw PostgreSQL frontend messages, for tests that drive the
/// `postgres` endpoint byte-for-byte instead of through the codec.
pub mod pg_frontend {
    /// A startup packet advertising protocol version 3.0 with the given
    /// `key`/`value` parameter pairs (typically `user` and `database`).
    pub fn startup_packet(params: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&196_608u32.to_be_bytes());
        for (key, value) in params {
            body.extend_from_slice(key.as_bytes());
            body.push(0);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);

        let mut packet = Vec::new();
        packet.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        packet.extend_from_slice(&body);
        packet
    }

    /// A simple-query (`'Q'`) message carrying `sql`.
    pub fn query(sql: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(sql.as_bytes());
        body.push(0);

        let mut message = vec![b'Q'];
        message.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        message.extend_from_slice(&body);
        message
    }

    /// A terminate (`'X'`) message.
    pub fn terminate() -> Vec<u8> {
        let mut message = vec![b'X'];
        message.extend_from_slice(&4u32.to_be_bytes());
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn duplex_cursor_replays_reads_and_captures_writes() {
        use futures_lite::{AsyncReadExt, AsyncWriteExt};

        let mut cursor = DuplexCursor::new(b"hello".to_vec());
        let mut buf = [0u8; 5];
        cursor.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        cursor.write_all(b"world").await.unwrap();
        assert_eq!(cursor.written(), b"world");
    }

    #[test]
    fn startup_packet_advertises_protocol_version_3() {
        let packet = pg_frontend::startup_packet(&[("user", "probe")]);
        let version = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        assert_eq!(version, 196_608);
    }
}
