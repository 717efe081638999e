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

//! Pure, synchronous primitives for writing the primitive wire types into an
//! in-memory buffer, plus the single async write that hits the socket.

use crate::error::Result;
use byteorder::{ByteOrder, NetworkEndian};
use futures_lite::{AsyncWrite, AsyncWriteExt};

/// An in-memory accumulator for the primitive wire types used across every
/// signal's pack contract.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        ByteWriter::default()
    }

    /// Writes a single unsigned byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Writes a big-endian `u32`.
    pub fn write_u32_be(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        NetworkEndian::write_u32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    /// Writes an unsigned LEB128 varint.
    pub fn write_varint_u64(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a length-prefixed UTF-8 string: `<u32-BE length><bytes>`.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32_be(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Consumes the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Writes exactly one `length‖kind‖payload` envelope in a single syscall
/// batch where the underlying writer supports it (a `write_all` over the
/// concatenated buffer).
pub async fn write_envelope<W>(sink: &mut W, kind: u8, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = (payload.len() + 1) as u32;
    let mut framed = Vec::with_capacity(4 + payload.len() + 1);
    framed.extend_from_slice(&length.to_be_bytes());
    framed.push(kind);
    framed.extend_from_slice(payload);
    sink.write_all(&framed).await?;
    Ok(())
}
