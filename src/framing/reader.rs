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

//! Pure, synchronous primitives for reading the primitive wire types out of
//! an already-buffered payload. No suspension happens here; the only
//! suspension point in the framing stack is [`read_envelope`], which
//! performs the socket read.

use crate::error::{GatewayError, Result};
use byteorder::{ByteOrder, NetworkEndian};
use futures_lite::{AsyncRead, AsyncReadExt};

/// A cursor over an in-memory payload, offering short-read-checked reads of
/// the primitive wire types used across every signal's pack/unpack contract.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wraps `buf` for sequential reading from the start.
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads a single unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32_be(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(NetworkEndian::read_u32(bytes))
    }

    /// Reads an unsigned LEB128 varint.
    pub fn read_varint_u64(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(GatewayError::malformed_field("varint"));
            }
        }
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(GatewayError::truncated());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a length-prefixed UTF-8 string: `<u32-BE length><bytes>`.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32_be()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| GatewayError::malformed_field("string"))
    }
}

/// Reads exactly one `length‖kind‖payload` envelope from an async byte
/// source. `max_payload` bounds the payload (kind byte included in the
/// length, per the wire contract in `spec.md` §3); an oversize envelope is
/// rejected before the payload is allocated.
pub async fn read_envelope<R>(source: &mut R, max_payload: u32) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    source
        .read_exact(&mut len_buf)
        .await
        .map_err(|_| GatewayError::truncated())?;
    let length = NetworkEndian::read_u32(&len_buf);
    if length == 0 {
        return Err(GatewayError::truncated());
    }
    if length > max_payload {
        return Err(GatewayError::oversize(max_payload, length));
    }

    let mut kind_buf = [0u8; 1];
    source
        .read_exact(&mut kind_buf)
        .await
        .map_err(|_| GatewayError::truncated())?;
    let kind = kind_buf[0];

    let payload_len = (length - 1) as usize;
    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        source
            .read_exact(&mut payload)
            .await
            .map_err(|_| GatewayError::truncated())?;
    }
    Ok((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primitives_in_sequence() {
        let mut buf = vec![];
        buf.push(7u8);
        buf.extend_from_slice(&42u32.to_be_bytes());
        buf.push(0xAC);
        buf.push(0x02); // varint 300
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"hello");

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u32_be().unwrap(), 42);
        assert_eq!(reader.read_varint_u64().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn short_read_is_truncated() {
        let buf = vec![0u8; 2];
        let mut reader = ByteReader::new(&buf);
        assert!(reader.read_u32_be().is_err());
    }

    #[async_std::test]
    async fn envelope_round_trip_via_async_source() {
        let mut wire = vec![];
        wire.extend_from_slice(&3u32.to_be_bytes()); // 1 (kind) + 2 (payload)
        wire.push(9); // kind
        wire.extend_from_slice(&[1, 2]);

        let mut cursor = futures_lite::io::Cursor::new(wire);
        let (kind, payload) = read_envelope(&mut cursor, 1024).await.unwrap();
        assert_eq!(kind, 9);
        assert_eq!(payload, vec![1, 2]);
    }

    #[async_std::test]
    async fn oversize_envelope_is_rejected_before_allocating() {
        let mut wire = vec![];
        wire.extend_from_slice(&1_000u32.to_be_bytes());
        wire.push(9);

        let mut cursor = futures_lite::io::Cursor::new(wire);
        let result = read_envelope(&mut cursor, 16).await;
        assert!(result.is_err());
    }
}
