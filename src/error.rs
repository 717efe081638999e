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

//! Crate-wide error type shared by every component of the gateway.
//!
//! Follows the same shape as the rest of the stack: a stable `code`, a
//! `severity` for wire translation, and a `kind` carrying the structured
//! detail. Nothing in this crate panics on a reachable error path; every
//! fallible function returns `Result<T, GatewayError>`.

use std::fmt::{self, Display, Formatter};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Message severities, reused verbatim for PostgreSQL `ErrorResponse` framing
/// and for the native endpoint's `ServerException` signal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Severity {
    /// A query-scoped failure; the connection survives.
    Error,
    /// A connection-scoped failure; the handler closes after reporting it.
    Fatal,
}

impl From<Severity> for &'static str {
    fn from(severity: Severity) -> &'static str {
        match severity {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Framing-layer failures raised by the codec and the framing I/O primitives.
#[derive(Debug, Clone, PartialEq)]
pub enum FramingErrorKind {
    /// The stream closed before a full envelope could be read.
    Truncated,
    /// The advertised payload length exceeds the configured ceiling.
    Oversize { limit: u32, got: u32 },
    /// A length-prefixed string or varint could not be parsed.
    MalformedField(&'static str),
    /// The kind byte has no registered constructor.
    UnknownKind(u8),
}

/// Protocol-layer failures: a signal arrived that the state machine cannot
/// accept in its current state.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolErrorKind {
    /// A signal kind is not valid for the connection's current state.
    UnexpectedSignal { state: &'static str, kind: &'static str },
    /// A second query was submitted while one was already in flight.
    DuplicateQuery,
}

/// Authentication and authorization failures.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthErrorKind {
    /// A post-auth hook fired before the connection authenticated.
    Unauthenticated,
    /// The auth provider rejected the supplied credentials.
    InvalidCredentials,
    /// The session token presented by the client has expired.
    ExpiredToken,
    /// The principal lacks the permission required for the statement.
    InsufficientPermission { required: &'static str },
}

/// Resource-accounting and admission-control failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceErrorKind {
    /// The connection pool is at its configured ceiling.
    ConnectionPoolFull { max: usize },
    /// The connection already has as many queries in flight as allowed.
    ConcurrentQueryLimit { max: usize },
    /// A query ran longer than its wall-clock budget.
    DurationExceeded { limit_millis: u64 },
    /// A query produced more rows than its cap allows.
    RowsExceeded { limit: u64 },
    /// The circuit breaker is open and is rejecting traffic.
    CircuitOpen,
}

/// Query-dispatch failures: the engine, catalog, or storage facade refused
/// or failed the request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchErrorKind {
    /// The execution engine reported a failure executing the statement.
    EngineFailure(String),
    /// The catalog facade reported a failure.
    CatalogFailure(String),
    /// The storage facade reported a failure.
    StorageFailure(String),
    /// The referenced table does not exist.
    TableNotFound(String),
    /// Neither the engine nor the native handler can make sense of the
    /// statement.
    UnsupportedStatement(String),
}

/// Archive pack/unpack failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveErrorKind {
    /// An entry name attempted to escape the extraction root.
    PathTraversal(String),
    /// An entry name was an absolute path.
    AbsolutePath(String),
    /// An entry name contained a disallowed byte (NUL, CR, LF).
    SuspiciousCharacter(String),
    /// An entry name exceeded the 255-byte limit.
    PathTooLong(String),
    /// The archive (or an incoming entry name) was empty where a name was
    /// required.
    EmptyPath,
    /// The packed tree exceeds the configured maximum archive size.
    SizeLimitExceeded { limit_bytes: u64 },
    /// A file's digest did not match its manifest entry during a verified
    /// extraction.
    ChecksumMismatch { path: String },
}

/// The structured detail of a [`GatewayError`].
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayErrorKind {
    /// See [`FramingErrorKind`].
    Framing(FramingErrorKind),
    /// See [`ProtocolErrorKind`].
    Protocol(ProtocolErrorKind),
    /// See [`AuthErrorKind`].
    Auth(AuthErrorKind),
    /// See [`ResourceErrorKind`].
    Resource(ResourceErrorKind),
    /// See [`DispatchErrorKind`].
    Dispatch(DispatchErrorKind),
    /// See [`ArchiveErrorKind`].
    Archive(ArchiveErrorKind),
    /// The underlying socket or file I/O failed.
    Io(String),
}

/// The single error type threaded through every fallible gateway operation.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayError {
    severity: Severity,
    code: &'static str,
    kind: GatewayErrorKind,
    hint: Option<&'static str>,
}

impl GatewayError {
    fn new(severity: Severity, code: &'static str, kind: GatewayErrorKind) -> Self {
        GatewayError {
            severity,
            code,
            kind,
            hint: None,
        }
    }

    /// Attaches a short, user-visible hint to this error.
    pub fn with_hint(mut self, hint: &'static str) -> Self {
        self.hint = Some(hint);
        self
    }

    /// The stable error code, suitable for PostgreSQL SQLSTATE translation.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// The severity used to decide whether the connection survives.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The structured detail.
    pub fn kind(&self) -> &GatewayErrorKind {
        &self.kind
    }

    /// A short, user-visible hint, if one was attached.
    pub fn hint(&self) -> Option<&'static str> {
        self.hint
    }

    /// Whether this error is fatal to the connection (framing, protocol, and
    /// resource errors are; auth and dispatch errors are not).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::Framing(_) | GatewayErrorKind::Protocol(_) | GatewayErrorKind::Resource(_)
        )
    }

    // --- Framing ---

    /// The stream closed before a full envelope could be read.
    pub fn truncated() -> Self {
        Self::new(
            Severity::Fatal,
            "08006",
            GatewayErrorKind::Framing(FramingErrorKind::Truncated),
        )
    }

    /// The advertised payload length exceeds the configured ceiling.
    pub fn oversize(limit: u32, got: u32) -> Self {
        Self::new(
            Severity::Fatal,
            "54000",
            GatewayErrorKind::Framing(FramingErrorKind::Oversize { limit, got }),
        )
    }

    /// A length-prefixed string or varint could not be parsed.
    pub fn malformed_field(field: &'static str) -> Self {
        Self::new(
            Severity::Fatal,
            "22000",
            GatewayErrorKind::Framing(FramingErrorKind::MalformedField(field)),
        )
    }

    /// The kind byte has no registered constructor.
    pub fn unknown_kind(kind: u8) -> Self {
        Self::new(
            Severity::Fatal,
            "0A000",
            GatewayErrorKind::Framing(FramingErrorKind::UnknownKind(kind)),
        )
    }

    // --- Protocol ---

    /// A signal kind is not valid for the connection's current state.
    pub fn unexpected_signal(state: &'static str, kind: &'static str) -> Self {
        Self::new(
            Severity::Fatal,
            "08P01",
            GatewayErrorKind::Protocol(ProtocolErrorKind::UnexpectedSignal { state, kind }),
        )
    }

    /// A second query was submitted while one was already in flight.
    pub fn duplicate_query() -> Self {
        Self::new(
            Severity::Fatal,
            "55000",
            GatewayErrorKind::Protocol(ProtocolErrorKind::DuplicateQuery),
        )
    }

    // --- Auth ---

    /// A post-auth hook fired before the connection authenticated.
    pub fn unauthenticated() -> Self {
        Self::new(
            Severity::Error,
            "28000",
            GatewayErrorKind::Auth(AuthErrorKind::Unauthenticated),
        )
    }

    /// The auth provider rejected the supplied credentials.
    pub fn invalid_credentials() -> Self {
        Self::new(
            Severity::Error,
            "28P01",
            GatewayErrorKind::Auth(AuthErrorKind::InvalidCredentials),
        )
    }

    /// The session token presented by the client has expired.
    pub fn expired_token() -> Self {
        Self::new(
            Severity::Error,
            "28P01",
            GatewayErrorKind::Auth(AuthErrorKind::ExpiredToken),
        )
    }

    /// The principal lacks the permission required for the statement.
    pub fn insufficient_permission(required: &'static str) -> Self {
        Self::new(
            Severity::Error,
            "42501",
            GatewayErrorKind::Auth(AuthErrorKind::InsufficientPermission { required }),
        )
    }

    // --- Resource ---

    /// The connection pool is at its configured ceiling.
    pub fn connection_pool_full(max: usize) -> Self {
        Self::new(
            Severity::Fatal,
            "53300",
            GatewayErrorKind::Resource(ResourceErrorKind::ConnectionPoolFull { max }),
        )
    }

    /// The connection already has as many queries in flight as allowed.
    pub fn concurrent_query_limit(max: usize) -> Self {
        Self::new(
            Severity::Error,
            "53400",
            GatewayErrorKind::Resource(ResourceErrorKind::ConcurrentQueryLimit { max }),
        )
    }

    /// A query ran longer than its wall-clock budget.
    pub fn duration_exceeded(limit_millis: u64) -> Self {
        Self::new(
            Severity::Error,
            "57014",
            GatewayErrorKind::Resource(ResourceErrorKind::DurationExceeded { limit_millis }),
        )
    }

    /// A query produced more rows than its cap allows.
    pub fn rows_exceeded(limit: u64) -> Self {
        Self::new(
            Severity::Error,
            "53202",
            GatewayErrorKind::Resource(ResourceErrorKind::RowsExceeded { limit }),
        )
    }

    /// The circuit breaker is open and is rejecting traffic.
    pub fn circuit_open() -> Self {
        Self::new(
            Severity::Error,
            "57P03",
            GatewayErrorKind::Resource(ResourceErrorKind::CircuitOpen),
        )
    }

    // --- Dispatch ---

    /// The execution engine reported a failure executing the statement.
    pub fn engine_failure(message: impl Into<String>) -> Self {
        Self::new(
            Severity::Error,
            "58000",
            GatewayErrorKind::Dispatch(DispatchErrorKind::EngineFailure(message.into())),
        )
    }

    /// The catalog facade reported a failure.
    pub fn catalog_failure(message: impl Into<String>) -> Self {
        Self::new(
            Severity::Error,
            "58001",
            GatewayErrorKind::Dispatch(DispatchErrorKind::CatalogFailure(message.into())),
        )
    }

    /// The storage facade reported a failure.
    pub fn storage_failure(message: impl Into<String>) -> Self {
        Self::new(
            Severity::Error,
            "58030",
            GatewayErrorKind::Dispatch(DispatchErrorKind::StorageFailure(message.into())),
        )
    }

    /// The referenced table does not exist.
    pub fn table_not_found(qualified_name: impl Into<String>) -> Self {
        Self::new(
            Severity::Error,
            "42P01",
            GatewayErrorKind::Dispatch(DispatchErrorKind::TableNotFound(qualified_name.into())),
        )
        .with_hint("Run SHOW TABLES to see available tables")
    }

    /// Neither the engine nor the native handler can make sense of the
    /// statement.
    pub fn unsupported_statement(raw_sql: impl Into<String>) -> Self {
        Self::new(
            Severity::Error,
            "42601",
            GatewayErrorKind::Dispatch(DispatchErrorKind::UnsupportedStatement(raw_sql.into())),
        )
    }

    // --- Archive ---

    /// An entry name attempted to escape the extraction root.
    pub fn path_traversal(entry: impl Into<String>) -> Self {
        Self::new(
            Severity::Fatal,
            "ARC01",
            GatewayErrorKind::Archive(ArchiveErrorKind::PathTraversal(entry.into())),
        )
    }

    /// An entry name was an absolute path.
    pub fn absolute_path(entry: impl Into<String>) -> Self {
        Self::new(
            Severity::Fatal,
            "ARC02",
            GatewayErrorKind::Archive(ArchiveErrorKind::AbsolutePath(entry.into())),
        )
    }

    /// An entry name contained a disallowed byte.
    pub fn suspicious_character(entry: impl Into<String>) -> Self {
        Self::new(
            Severity::Fatal,
            "ARC03",
            GatewayErrorKind::Archive(ArchiveErrorKind::SuspiciousCharacter(entry.into())),
        )
    }

    /// An entry name exceeded the 255-byte limit.
    pub fn path_too_long(entry: impl Into<String>) -> Self {
        Self::new(
            Severity::Fatal,
            "ARC04",
            GatewayErrorKind::Archive(ArchiveErrorKind::PathTooLong(entry.into())),
        )
    }

    /// An entry name was empty.
    pub fn empty_path() -> Self {
        Self::new(
            Severity::Fatal,
            "ARC05",
            GatewayErrorKind::Archive(ArchiveErrorKind::EmptyPath),
        )
    }

    /// The packed tree exceeds the configured maximum archive size.
    pub fn size_limit_exceeded(limit_bytes: u64) -> Self {
        Self::new(
            Severity::Fatal,
            "ARC06",
            GatewayErrorKind::Archive(ArchiveErrorKind::SizeLimitExceeded { limit_bytes }),
        )
    }

    /// A file's digest did not match its manifest entry.
    pub fn checksum_mismatch(path: impl Into<String>) -> Self {
        Self::new(
            Severity::Fatal,
            "ARC07",
            GatewayErrorKind::Archive(ArchiveErrorKind::ChecksumMismatch { path: path.into() }),
        )
    }

    /// Wraps an opaque I/O failure.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, "58030", GatewayErrorKind::Io(message.into()))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::io(err.to_string())
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

impl Display for GatewayErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing(kind) => write!(f, "{}", kind),
            Self::Protocol(kind) => write!(f, "{}", kind),
            Self::Auth(kind) => write!(f, "{}", kind),
            Self::Resource(kind) => write!(f, "{}", kind),
            Self::Dispatch(kind) => write!(f, "{}", kind),
            Self::Archive(kind) => write!(f, "{}", kind),
            Self::Io(message) => write!(f, "I/O error: {}", message),
        }
    }
}

impl Display for FramingErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "connection closed mid-envelope"),
            Self::Oversize { limit, got } => {
                write!(f, "envelope of {} bytes exceeds the {} byte ceiling", got, limit)
            }
            Self::MalformedField(field) => write!(f, "malformed {} in payload", field),
            Self::UnknownKind(kind) => write!(f, "unknown signal kind {}", kind),
        }
    }
}

impl Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedSignal { state, kind } => {
                write!(f, "signal {} is not valid while connection is {}", kind, state)
            }
            Self::DuplicateQuery => write!(f, "a query is already in flight on this connection"),
        }
    }
}

impl Display for AuthErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "connection has not completed authentication"),
            Self::InvalidCredentials => write!(f, "invalid username or password"),
            Self::ExpiredToken => write!(f, "session token has expired"),
            Self::InsufficientPermission { required } => {
                write!(f, "principal lacks required permission \"{}\"", required)
            }
        }
    }
}

impl Display for ResourceErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionPoolFull { max } => write!(f, "connection pool is full (max {})", max),
            Self::ConcurrentQueryLimit { max } => {
                write!(f, "connection already has {} concurrent quer{} in flight", max, if *max == 1 { "y" } else { "ies" })
            }
            Self::DurationExceeded { limit_millis } => write!(f, "query exceeded duration limit of {} ms", limit_millis),
            Self::RowsExceeded { limit } => write!(f, "query exceeded row limit of {}", limit),
            Self::CircuitOpen => write!(f, "service temporarily unavailable"),
        }
    }
}

impl Display for DispatchErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineFailure(message) => write!(f, "execution engine error: {}", message),
            Self::CatalogFailure(message) => write!(f, "catalog error: {}", message),
            Self::StorageFailure(message) => write!(f, "storage error: {}", message),
            Self::TableNotFound(name) => write!(f, "table \"{}\" does not exist", name),
            Self::UnsupportedStatement(raw) => write!(f, "statement is not supported: {}", raw),
        }
    }
}

impl Display for ArchiveErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathTraversal(entry) => write!(f, "entry \"{}\" attempts to traverse outside the target directory", entry),
            Self::AbsolutePath(entry) => write!(f, "entry \"{}\" is an absolute path", entry),
            Self::SuspiciousCharacter(entry) => write!(f, "entry \"{}\" contains a disallowed character", entry),
            Self::PathTooLong(entry) => write!(f, "entry \"{}\" exceeds the maximum path length", entry),
            Self::EmptyPath => write!(f, "entry name is empty"),
            Self::SizeLimitExceeded { limit_bytes } => write!(f, "archive exceeds the {} byte size limit", limit_bytes),
            Self::ChecksumMismatch { path } => write!(f, "checksum mismatch for \"{}\"", path),
        }
    }
}

impl std::error::Error for GatewayError {}
