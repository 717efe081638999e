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

//! Ties the [`Registry`] to the framing layer: encoding a signal into a
//! wire envelope, and decoding a wire envelope back into a signal, bounded
//! by a configurable payload ceiling.

use crate::codec::registry::Registry;
use crate::codec::signal::{ClientSignal, ServerSignal};
use crate::error::Result;
use crate::framing::{read_envelope, write_envelope, ByteWriter};
use futures_lite::{AsyncRead, AsyncWrite};
use std::sync::Arc;

/// Encodes and decodes signals against a shared, process-wide [`Registry`].
/// Cheap to clone; the registry is reference-counted and never mutated
/// after construction.
#[derive(Clone)]
pub struct Codec {
    registry: Arc<Registry>,
    max_payload_bytes: u32,
}

impl Codec {
    /// Builds a codec bound to `registry`, rejecting payloads larger than
    /// `max_payload_bytes`.
    pub fn new(registry: Arc<Registry>, max_payload_bytes: u32) -> Self {
        Codec {
            registry,
            max_payload_bytes,
        }
    }

    /// Serializes a client signal into a `<length><kind><payload>` envelope.
    pub fn encode_client(&self, signal: &ClientSignal) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u32_be((signal.pack().len() + 1) as u32);
        writer.write_u8(signal.kind());
        writer.write_bytes(&signal.pack());
        writer.into_bytes()
    }

    /// Serializes a server signal into a `<length><kind><payload>` envelope.
    pub fn encode_server(&self, signal: &ServerSignal) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u32_be((signal.pack().len() + 1) as u32);
        writer.write_u8(signal.kind());
        writer.write_bytes(&signal.pack());
        writer.into_bytes()
    }

    /// Writes a server signal directly to an async sink.
    pub async fn write_server<W>(&self, sink: &mut W, signal: &ServerSignal) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        write_envelope(sink, signal.kind(), &signal.pack()).await
    }

    /// Writes a client signal directly to an async sink.
    pub async fn write_client<W>(&self, sink: &mut W, signal: &ClientSignal) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        write_envelope(sink, signal.kind(), &signal.pack()).await
    }

    /// Reads one envelope from `source` and decodes it as a client signal.
    pub async fn read_client<R>(&self, source: &mut R) -> Result<ClientSignal>
    where
        R: AsyncRead + Unpin,
    {
        let (kind, payload) = read_envelope(source, self.max_payload_bytes).await?;
        self.decode_client(kind, &payload)
    }

    /// Reads one envelope from `source` and decodes it as a server signal.
    pub async fn read_server<R>(&self, source: &mut R) -> Result<ServerSignal>
    where
        R: AsyncRead + Unpin,
    {
        let (kind, payload) = read_envelope(source, self.max_payload_bytes).await?;
        self.decode_server(kind, &payload)
    }

    /// Decodes a previously-read `(kind, payload)` pair as a client signal,
    /// validating the kind against the registry before parsing the payload.
    pub fn decode_client(&self, kind: u8, payload: &[u8]) -> Result<ClientSignal> {
        self.registry
            .client_meta(kind)
            .ok_or_else(|| crate::error::GatewayError::unknown_kind(kind))?;
        ClientSignal::unpack(kind, payload)
    }

    /// Decodes a previously-read `(kind, payload)` pair as a server signal,
    /// validating the kind against the registry before parsing the payload.
    pub fn decode_server(&self, kind: u8, payload: &[u8]) -> Result<ServerSignal> {
        self.registry
            .server_meta(kind)
            .ok_or_else(|| crate::error::GatewayError::unknown_kind(kind))?;
        ServerSignal::unpack(kind, payload)
    }

    /// The shared registry backing this codec.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::signal::ClientSignal;

    fn codec() -> Codec {
        Codec::new(Arc::new(Registry::with_builtin_signals().unwrap()), 64 * 1024 * 1024)
    }

    #[async_std::test]
    async fn client_signal_round_trips_through_async_socket() {
        let codec = codec();
        let mut wire = Vec::new();
        let sent = ClientSignal::Query {
            sql: "SELECT 1".to_owned(),
        };
        codec.write_client(&mut wire, &sent).await.unwrap();

        let mut cursor = futures_lite::io::Cursor::new(wire);
        let received = codec.read_client(&mut cursor).await.unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn decoding_unregistered_kind_fails() {
        let codec = codec();
        assert!(codec.decode_client(200, &[]).is_err());
    }
}
