//! Error taxonomy for the runtime.
//!
//! The variants fall into four families with different recovery stories:
//!
//! - [`Error::NotFound`] — a lookup yielded no row; always recoverable by
//!   the caller.
//! - [`Error::TransactionAlreadyActive`] / [`Error::TransactionNotActive`] —
//!   programmer-error misuse of the transaction scope; fatal to the current
//!   operation and never retried.
//! - [`Error::Query`] / [`Error::Connection`] / [`Error::Protocol`] /
//!   [`Error::Timeout`] — backend failures, surfaced with the backend's own
//!   diagnostics (SQLSTATE et al.).
//! - [`Error::UnknownColumn`] / [`Error::InvalidFilter`] — local
//!   precondition failures that fail before any I/O.
//!
//! Cache unavailability is deliberately absent from the caller-visible
//! surface: the cache layer downgrades to the direct-query path instead.

use std::fmt;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for all Stratum operations.
#[derive(Debug)]
pub enum Error {
    /// A lookup matched no row. Carries the lookup description (cache key).
    NotFound(String),
    /// `begin_transaction` while a transaction scope is already open.
    TransactionAlreadyActive,
    /// `commit`/`rollback` on a transaction scope that already finished.
    TransactionNotActive,
    /// Access to a column the entity does not declare.
    UnknownColumn {
        /// Entity (or table) name.
        entity: String,
        /// The undeclared column.
        column: String,
    },
    /// A filter or clause failed local validation before any I/O.
    InvalidFilter(String),
    /// The backend rejected a statement.
    Query(QueryError),
    /// Connecting to or talking with the backend failed.
    Connection(ConnectionError),
    /// The backend sent bytes this client could not understand.
    Protocol(ProtocolError),
    /// An operation exceeded its deadline.
    Timeout,
}

impl Error {
    /// The backend-reported SQLSTATE, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Whether this is PostgreSQL's "relation does not exist" (42P01),
    /// which the migration runner uses to detect a missing history table.
    pub fn is_undefined_table(&self) -> bool {
        self.sqlstate() == Some("42P01")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "{what} not found"),
            Error::TransactionAlreadyActive => write!(f, "transaction already active"),
            Error::TransactionNotActive => write!(f, "transaction not active"),
            Error::UnknownColumn { entity, column } => {
                write!(f, "unknown column \"{column}\" on {entity}")
            }
            Error::InvalidFilter(msg) => write!(f, "invalid filter: {msg}"),
            Error::Query(q) => write!(f, "{q}"),
            Error::Connection(c) => write!(f, "{c}"),
            Error::Protocol(p) => write!(f, "{p}"),
            Error::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(c) => c.source.as_deref().map(|e| e as _),
            _ => None,
        }
    }
}

/// A statement the backend rejected, with its diagnostics.
#[derive(Debug, Clone)]
pub struct QueryError {
    /// Coarse classification derived from the SQLSTATE class.
    pub kind: QueryErrorKind,
    /// Human-readable message from the backend.
    pub message: String,
    /// Five-character SQLSTATE code, when the backend supplied one.
    pub sqlstate: Option<String>,
    /// Additional detail from the backend.
    pub detail: Option<String>,
    /// Hint from the backend.
    pub hint: Option<String>,
    /// 1-based error position within the statement text.
    pub position: Option<usize>,
}

impl QueryError {
    /// A query error with just a kind and message.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sqlstate: None,
            detail: None,
            hint: None,
            position: None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query error ({:?}): {}", self.kind, self.message)?;
        if let Some(state) = &self.sqlstate {
            write!(f, " [SQLSTATE {state}]")?;
        }
        Ok(())
    }
}

/// Coarse query-error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error or missing object (SQLSTATE class 42).
    Syntax,
    /// Constraint violation (class 23).
    Constraint,
    /// Serialization failure (40001).
    Serialization,
    /// Deadlock detected (class 40 other than 40001).
    Deadlock,
    /// Statement cancelled server-side (57014).
    Cancelled,
    /// Server-side timeout (class 57 other than 57014).
    Timeout,
    /// Anything else the backend reported.
    Database,
}

/// A failure establishing or using the transport to the backend.
#[derive(Debug)]
pub struct ConnectionError {
    /// What stage of the connection failed.
    pub kind: ConnectionErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Underlying I/O error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConnectionError {
    /// A connection error without an underlying source.
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection error ({:?}): {}", self.kind, self.message)
    }
}

/// Connection failure stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Could not establish the transport.
    Connect,
    /// The peer refused the connection.
    Refused,
    /// Authentication failed or is unsupported.
    Authentication,
    /// The peer went away mid-conversation.
    Disconnected,
}

/// The peer sent bytes that do not form a valid protocol message.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    /// What could not be parsed.
    pub message: String,
}

impl ProtocolError {
    /// A protocol error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {}", self.message)
    }
}
