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

//! The closed set of client- and server-originated signals, modeled as sum
//! types per `spec.md` §9 ("Dynamic signal dispatch by integer kind" is
//! re-architected as a match on a compile-time-closed enum). Kind numbers
//! and field order follow `spec.md` §6 exactly.

use crate::error::{GatewayError, Result};
use crate::framing::{ByteReader, ByteWriter};

/// Which side of the wire a signal travels.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    /// Client → server.
    ClientToServer,
    /// Server → client.
    ServerToClient,
}

/// Diagnostic metadata about a registered signal kind.
#[derive(Debug, Clone)]
pub struct SignalMeta {
    /// Which side of the wire this signal travels.
    pub direction: Direction,
    /// Human-readable name, used in logs and diagnostics.
    pub name: &'static str,
    /// The protocol revision the signal was introduced in.
    pub version: u32,
}

/// A single row of a [`DataBlock`]; invariant `cells.len() == columns.len()`
/// is enforced by [`DataBlock::new`].
pub type Row = Vec<String>;

/// Bulk ingestion payload: a table name, its ordered columns and their type
/// tags, and a row-major matrix of cell values.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    /// Fully qualified or bare table name.
    pub table_name: String,
    /// Ordered column names.
    pub columns: Vec<String>,
    /// Parallel column type tags.
    pub column_types: Vec<String>,
    /// Row-major matrix; every row has exactly `columns.len()` cells.
    pub rows: Vec<Row>,
}

impl DataBlock {
    /// Builds a `DataBlock`, rejecting rows whose width disagrees with the
    /// column count.
    pub fn new(table_name: String, columns: Vec<String>, column_types: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        for row in &rows {
            if row.len() != columns.len() {
                return Err(GatewayError::malformed_field("data block row width"));
            }
        }
        Ok(DataBlock {
            table_name,
            columns,
            column_types,
            rows,
        })
    }

    fn pack(&self, writer: &mut ByteWriter) {
        writer.write_string(&self.table_name);
        writer.write_varint_u64(self.columns.len() as u64);
        for (name, ty) in self.columns.iter().zip(self.column_types.iter()) {
            writer.write_string(name);
            writer.write_string(ty);
        }
        writer.write_varint_u64(self.rows.len() as u64);
        for row in &self.rows {
            for cell in row {
                writer.write_string(cell);
            }
        }
    }

    fn unpack(reader: &mut ByteReader) -> Result<Self> {
        let table_name = reader.read_string()?;
        let column_count = reader.read_varint_u64()? as usize;
        let mut columns = Vec::with_capacity(column_count);
        let mut column_types = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(reader.read_string()?);
            column_types.push(reader.read_string()?);
        }
        let row_count = reader.read_varint_u64()? as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let mut row = Vec::with_capacity(column_count);
            for _ in 0..column_count {
                row.push(reader.read_string()?);
            }
            rows.push(row);
        }
        DataBlock::new(table_name, columns, column_types, rows)
    }
}

/// One column of a column-granular `ServerData` frame: a name, a type tag,
/// and every value of that column joined into a single comma-separated
/// string, per `spec.md` §4.5's native-endpoint framing choice.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFrame {
    /// Column name.
    pub name: String,
    /// Column type tag (e.g. `"UInt32"`, `"String"`).
    pub type_tag: String,
    /// Number of values in this column.
    pub row_count: u64,
    /// Comma-joined values.
    pub joined_values: String,
}

impl ColumnFrame {
    fn pack(&self, writer: &mut ByteWriter) {
        writer.write_string(&self.name);
        writer.write_string(&self.type_tag);
        writer.write_varint_u64(self.row_count);
        writer.write_string(&self.joined_values);
    }

    fn unpack(reader: &mut ByteReader) -> Result<Self> {
        Ok(ColumnFrame {
            name: reader.read_string()?,
            type_tag: reader.read_string()?,
            row_count: reader.read_varint_u64()?,
            joined_values: reader.read_string()?,
        })
    }
}

/// Query progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Rows read so far.
    pub read_rows: u64,
    /// Bytes read so far.
    pub read_bytes: u64,
    /// Total rows the engine expects to read, if known.
    pub total_rows_to_read: u64,
}

/// Block-level execution statistics, sent once per result via
/// `ServerProfileInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileInfo {
    /// Rows returned.
    pub rows: u64,
    /// Number of blocks the result was split into.
    pub blocks: u64,
    /// Bytes returned.
    pub bytes: u64,
}

/// Client-originated signal. Kind numbers per `spec.md` §6.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    /// Opens a session: client name and the three-part protocol version.
    Hello {
        /// Client-reported display name.
        client_name: String,
        /// Major protocol version the client speaks.
        major: u64,
        /// Minor protocol version the client speaks.
        minor: u64,
        /// Protocol revision the client speaks.
        revision: u64,
    },
    /// Submits a statement for execution.
    Query {
        /// Raw SQL text.
        sql: String,
    },
    /// Submits a block of rows for bulk ingestion.
    Data {
        /// The block to ingest.
        block: DataBlock,
    },
    /// Requests cancellation of an in-flight query.
    Cancel {
        /// Server-assigned id of the query to cancel.
        query_id: String,
    },
    /// Liveness probe; answered with `ServerSignal::Pong`.
    Ping,
}

impl ClientSignal {
    /// The wire kind byte for this signal.
    pub fn kind(&self) -> u8 {
        match self {
            ClientSignal::Hello { .. } => 0,
            ClientSignal::Query { .. } => 1,
            ClientSignal::Data { .. } => 2,
            ClientSignal::Cancel { .. } => 3,
            ClientSignal::Ping => 4,
        }
    }

    /// A short, human-readable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientSignal::Hello { .. } => "ClientHello",
            ClientSignal::Query { .. } => "ClientQuery",
            ClientSignal::Data { .. } => "ClientData",
            ClientSignal::Cancel { .. } => "ClientCancel",
            ClientSignal::Ping => "ClientPing",
        }
    }

    /// Serializes the payload (kind and length are the caller's concern).
    pub fn pack(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        match self {
            ClientSignal::Hello {
                client_name,
                major,
                minor,
                revision,
            } => {
                writer.write_string(client_name);
                writer.write_varint_u64(*major);
                writer.write_varint_u64(*minor);
                writer.write_varint_u64(*revision);
            }
            ClientSignal::Query { sql } => writer.write_string(sql),
            ClientSignal::Data { block } => block.pack(&mut writer),
            ClientSignal::Cancel { query_id } => writer.write_string(query_id),
            ClientSignal::Ping => {}
        }
        writer.into_bytes()
    }

    /// Parses a payload for `kind` into the matching variant.
    pub fn unpack(kind: u8, payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        match kind {
            0 => Ok(ClientSignal::Hello {
                client_name: reader.read_string()?,
                major: reader.read_varint_u64()?,
                minor: reader.read_varint_u64()?,
                revision: reader.read_varint_u64()?,
            }),
            1 => Ok(ClientSignal::Query {
                sql: reader.read_string()?,
            }),
            2 => Ok(ClientSignal::Data {
                block: DataBlock::unpack(&mut reader)?,
            }),
            3 => Ok(ClientSignal::Cancel {
                query_id: reader.read_string()?,
            }),
            4 => Ok(ClientSignal::Ping),
            other => Err(GatewayError::unknown_kind(other)),
        }
    }
}

/// Server-originated signal. Kind numbers per `spec.md` §6.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerSignal {
    /// Answers `ClientHello` once authentication succeeds.
    Hello {
        /// Product name advertised to the client.
        server_name: String,
        /// Major protocol version.
        major: u64,
        /// Minor protocol version.
        minor: u64,
        /// Protocol revision, see `PROTOCOL_REVISION`.
        revision: u64,
        /// Server timezone, e.g. `"UTC"`.
        timezone: String,
        /// Server display name.
        display_name: String,
        /// Patch version.
        patch: u64,
    },
    /// One column of a result set, see [`ColumnFrame`].
    Data(ColumnFrame),
    /// A query-scoped or connection-scoped failure.
    Exception {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional short hint.
        hint: Option<String>,
    },
    /// Incremental execution progress.
    Progress(Progress),
    /// Answers `ClientPing`.
    Pong {
        /// Server clock at the time of the pong, milliseconds since epoch.
        timestamp_millis: u64,
    },
    /// Terminates a result stream.
    EndOfStream,
    /// Aggregate execution statistics for the just-completed result.
    ProfileInfo(ProfileInfo),
    /// Totals row(s), framed like `Data`.
    Totals(ColumnFrame),
    /// Extremes row(s), framed like `Data`.
    Extremes(ColumnFrame),
    /// Per-database table replication status (diagnostic only).
    TablesStatus {
        /// `(database, table names)` pairs.
        databases: Vec<(String, Vec<String>)>,
    },
    /// A structured log line emitted during execution.
    Log {
        /// Log source, e.g. the dispatcher component name.
        source: String,
        /// Log message.
        message: String,
    },
    /// Column metadata for a table, answering catalog introspection.
    TableColumns {
        /// Table name the columns belong to.
        table_name: String,
        /// `(column name, type tag)` pairs.
        columns: Vec<(String, String)>,
    },
    /// Opaque part identifiers (diagnostic only).
    PartUUIDs {
        /// Part identifiers as strings.
        uuids: Vec<String>,
    },
    /// Requests the client to contribute a unit of distributed work.
    ReadTaskRequest,
    /// Per-query profiling counters.
    ProfileEvents {
        /// `(event name, value)` pairs.
        events: Vec<(String, i64)>,
    },
    /// Requests the client to contribute a unit of distributed tree-read
    /// work.
    TreeReadTaskRequest,
}

impl ServerSignal {
    /// The wire kind byte for this signal.
    pub fn kind(&self) -> u8 {
        match self {
            ServerSignal::Hello { .. } => 0,
            ServerSignal::Data(_) => 1,
            ServerSignal::Exception { .. } => 2,
            ServerSignal::Progress(_) => 3,
            ServerSignal::Pong { .. } => 4,
            ServerSignal::EndOfStream => 5,
            ServerSignal::ProfileInfo(_) => 6,
            ServerSignal::Totals(_) => 7,
            ServerSignal::Extremes(_) => 8,
            ServerSignal::TablesStatus { .. } => 9,
            ServerSignal::Log { .. } => 10,
            ServerSignal::TableColumns { .. } => 11,
            ServerSignal::PartUUIDs { .. } => 12,
            ServerSignal::ReadTaskRequest => 13,
            ServerSignal::ProfileEvents { .. } => 14,
            ServerSignal::TreeReadTaskRequest => 15,
        }
    }

    /// A short, human-readable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerSignal::Hello { .. } => "ServerHello",
            ServerSignal::Data(_) => "ServerData",
            ServerSignal::Exception { .. } => "ServerException",
            ServerSignal::Progress(_) => "ServerProgress",
            ServerSignal::Pong { .. } => "ServerPong",
            ServerSignal::EndOfStream => "ServerEndOfStream",
            ServerSignal::ProfileInfo(_) => "ServerProfileInfo",
            ServerSignal::Totals(_) => "ServerTotals",
            ServerSignal::Extremes(_) => "ServerExtremes",
            ServerSignal::TablesStatus { .. } => "ServerTablesStatus",
            ServerSignal::Log { .. } => "ServerLog",
            ServerSignal::TableColumns { .. } => "ServerTableColumns",
            ServerSignal::PartUUIDs { .. } => "ServerPartUUIDs",
            ServerSignal::ReadTaskRequest => "ServerReadTaskRequest",
            ServerSignal::ProfileEvents { .. } => "ServerProfileEvents",
            ServerSignal::TreeReadTaskRequest => "ServerTreeReadTaskRequest",
        }
    }

    /// Serializes the payload (kind and length are the caller's concern).
    pub fn pack(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        match self {
            ServerSignal::Hello {
                server_name,
                major,
                minor,
                revision,
                timezone,
                display_name,
                patch,
            } => {
                writer.write_string(server_name);
                writer.write_varint_u64(*major);
                writer.write_varint_u64(*minor);
                writer.write_varint_u64(*revision);
                writer.write_string(timezone);
                writer.write_string(display_name);
                writer.write_varint_u64(*patch);
            }
            ServerSignal::Data(frame) => frame.pack(&mut writer),
            ServerSignal::Exception { code, message, hint } => {
                writer.write_string(code);
                writer.write_string(message);
                match hint {
                    Some(h) => {
                        writer.write_u8(1);
                        writer.write_string(h);
                    }
                    None => writer.write_u8(0),
                }
            }
            ServerSignal::Progress(progress) => {
                writer.write_varint_u64(progress.read_rows);
                writer.write_varint_u64(progress.read_bytes);
                writer.write_varint_u64(progress.total_rows_to_read);
            }
            ServerSignal::Pong { timestamp_millis } => writer.write_varint_u64(*timestamp_millis),
            ServerSignal::EndOfStream => {}
            ServerSignal::ProfileInfo(info) => {
                writer.write_varint_u64(info.rows);
                writer.write_varint_u64(info.blocks);
                writer.write_varint_u64(info.bytes);
            }
            ServerSignal::Totals(frame) => frame.pack(&mut writer),
            ServerSignal::Extremes(frame) => frame.pack(&mut writer),
            ServerSignal::TablesStatus { databases } => {
                writer.write_varint_u64(databases.len() as u64);
                for (db, tables) in databases {
                    writer.write_string(db);
                    writer.write_varint_u64(tables.len() as u64);
                    for table in tables {
                        writer.write_string(table);
                    }
                }
            }
            ServerSignal::Log { source, message } => {
                writer.write_string(source);
                writer.write_string(message);
            }
            ServerSignal::TableColumns { table_name, columns } => {
                writer.write_string(table_name);
                writer.write_varint_u64(columns.len() as u64);
                for (name, ty) in columns {
                    writer.write_string(name);
                    writer.write_string(ty);
                }
            }
            ServerSignal::PartUUIDs { uuids } => {
                writer.write_varint_u64(uuids.len() as u64);
                for uuid in uuids {
                    writer.write_string(uuid);
                }
            }
            ServerSignal::ReadTaskRequest => {}
            ServerSignal::ProfileEvents { events } => {
                writer.write_varint_u64(events.len() as u64);
                for (name, value) in events {
                    writer.write_string(name);
                    writer.write_varint_u64(*value as u64);
                }
            }
            ServerSignal::TreeReadTaskRequest => {}
        }
        writer.into_bytes()
    }

    /// Parses a payload for `kind` into the matching variant.
    pub fn unpack(kind: u8, payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        match kind {
            0 => Ok(ServerSignal::Hello {
                server_name: reader.read_string()?,
                major: reader.read_varint_u64()?,
                minor: reader.read_varint_u64()?,
                revision: reader.read_varint_u64()?,
                timezone: reader.read_string()?,
                display_name: reader.read_string()?,
                patch: reader.read_varint_u64()?,
            }),
            1 => Ok(ServerSignal::Data(ColumnFrame::unpack(&mut reader)?)),
            2 => {
                let code = reader.read_string()?;
                let message = reader.read_string()?;
                let has_hint = reader.read_u8()? != 0;
                let hint = if has_hint { Some(reader.read_string()?) } else { None };
                Ok(ServerSignal::Exception { code, message, hint })
            }
            3 => Ok(ServerSignal::Progress(Progress {
                read_rows: reader.read_varint_u64()?,
                read_bytes: reader.read_varint_u64()?,
                total_rows_to_read: reader.read_varint_u64()?,
            })),
            4 => Ok(ServerSignal::Pong {
                timestamp_millis: reader.read_varint_u64()?,
            }),
            5 => Ok(ServerSignal::EndOfStream),
            6 => Ok(ServerSignal::ProfileInfo(ProfileInfo {
                rows: reader.read_varint_u64()?,
                blocks: reader.read_varint_u64()?,
                bytes: reader.read_varint_u64()?,
            })),
            7 => Ok(ServerSignal::Totals(ColumnFrame::unpack(&mut reader)?)),
            8 => Ok(ServerSignal::Extremes(ColumnFrame::unpack(&mut reader)?)),
            9 => {
                let count = reader.read_varint_u64()? as usize;
                let mut databases = Vec::with_capacity(count);
                for _ in 0..count {
                    let db = reader.read_string()?;
                    let table_count = reader.read_varint_u64()? as usize;
                    let mut tables = Vec::with_capacity(table_count);
                    for _ in 0..table_count {
                        tables.push(reader.read_string()?);
                    }
                    databases.push((db, tables));
                }
                Ok(ServerSignal::TablesStatus { databases })
            }
            10 => Ok(ServerSignal::Log {
                source: reader.read_string()?,
                message: reader.read_string()?,
            }),
            11 => {
                let table_name = reader.read_string()?;
                let count = reader.read_varint_u64()? as usize;
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    columns.push((reader.read_string()?, reader.read_string()?));
                }
                Ok(ServerSignal::TableColumns { table_name, columns })
            }
            12 => {
                let count = reader.read_varint_u64()? as usize;
                let mut uuids = Vec::with_capacity(count);
                for _ in 0..count {
                    uuids.push(reader.read_string()?);
                }
                Ok(ServerSignal::PartUUIDs { uuids })
            }
            13 => Ok(ServerSignal::ReadTaskRequest),
            14 => {
                let count = reader.read_varint_u64()? as usize;
                let mut events = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = reader.read_string()?;
                    let value = reader.read_varint_u64()? as i64;
                    events.push((name, value));
                }
                Ok(ServerSignal::ProfileEvents { events })
            }
            15 => Ok(ServerSignal::TreeReadTaskRequest),
            other => Err(GatewayError::unknown_kind(other)),
        }
    }
}
