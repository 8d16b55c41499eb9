//! Async PostgreSQL connection.
//!
//! [`PgConnection`] speaks the wire protocol over asupersync's TCP stream:
//! startup, cleartext/MD5 password authentication, and the extended query
//! protocol for parameterized statements. [`SharedPgConnection`] wraps it in
//! a mutex and implements the [`Connection`] contract the pool and executor
//! consume.
//!
//! SCRAM and TLS are not implemented; servers must accept trust, password,
//! or md5 authentication for this driver.

// Allow `impl Future` return types in trait methods - intentional for async trait compat
#![allow(clippy::manual_async_fn)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};

use stratum_core::error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, QueryErrorKind,
};
use stratum_core::row::ColumnInfo;
use stratum_core::{Connection, Row, Value};

use crate::config::PgConfig;
use crate::protocol::{BackendMessage, ErrorFields, FrontendMessage, MessageReader};
use crate::types::{decode_value, encode_value};

/// A single PostgreSQL session.
pub struct PgConnection {
    stream: TcpStream,
    reader: MessageReader,
    read_buf: Vec<u8>,
    parameters: HashMap<String, String>,
    process_id: i32,
    secret_key: i32,
    config: PgConfig,
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("process_id", &self.process_id)
            .finish_non_exhaustive()
    }
}

struct PgQueryResult {
    rows: Vec<Row>,
    command_tag: Option<String>,
}

impl PgConnection {
    /// Connect and authenticate.
    pub async fn connect(cx: &Cx, config: PgConfig) -> Outcome<Self, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        Self::connect_detached(config).await
    }

    /// Connect outside any cancellation scope.
    ///
    /// Pool factories run detached from request contexts; the connect
    /// timeout still bounds the attempt.
    pub async fn connect_detached(config: PgConfig) -> Outcome<Self, Error> {
        let addr = match config.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("cannot resolve {}:{}: {}", config.host, config.port, e),
                    source: Some(Box::new(e)),
                }));
            }
        };

        let stream = match TcpStream::connect_timeout(addr, config.connect_timeout).await {
            Ok(s) => s,
            Err(e) => {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind,
                    message: format!("failed to connect to {addr}: {e}"),
                    source: Some(Box::new(e)),
                }));
            }
        };
        stream.set_nodelay(true).ok();

        let mut conn = Self {
            stream,
            reader: MessageReader::new(),
            read_buf: vec![0u8; 8192],
            parameters: HashMap::new(),
            process_id: 0,
            secret_key: 0,
            config,
        };

        let startup = FrontendMessage::Startup {
            params: conn.config.startup_params(),
        };
        if let Outcome::Err(e) = conn.send_message_no_cx(&startup).await {
            return Outcome::Err(e);
        }

        match conn.handle_auth().await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        match conn.read_startup_messages().await {
            Outcome::Ok(()) => Outcome::Ok(conn),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a parameterized statement and return all rows.
    pub async fn query_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Row>, Error> {
        match self.run_extended(cx, sql, params).await {
            Outcome::Ok(result) => Outcome::Ok(result.rows),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a statement and return the affected-row count from its command
    /// tag.
    pub async fn execute_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<u64, Error> {
        match self.run_extended(cx, sql, params).await {
            Outcome::Ok(result) => {
                Outcome::Ok(parse_rows_affected(result.command_tag.as_deref()).unwrap_or(0))
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Best-effort session close.
    pub async fn close_async(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let _ = self.send_message(cx, &FrontendMessage::Terminate).await;
        Outcome::Ok(())
    }

    /// Session parameters the server reported at startup.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Backend process id and secret key (for out-of-band cancel requests).
    pub fn backend_key_data(&self) -> (i32, i32) {
        (self.process_id, self.secret_key)
    }

    // ==================== Extended query protocol ====================

    async fn run_extended(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<PgQueryResult, Error> {
        let mut encoded = Vec::with_capacity(params.len());
        for value in params {
            if value.is_null() {
                encoded.push(None);
                continue;
            }
            match encode_value(value) {
                Ok(bytes) => encoded.push(Some(bytes)),
                Err(e) => return Outcome::Err(e),
            }
        }

        let sequence = [
            FrontendMessage::Parse {
                query: sql.to_string(),
            },
            FrontendMessage::Bind { params: encoded },
            FrontendMessage::Describe,
            FrontendMessage::Execute,
            FrontendMessage::Sync,
        ];
        for msg in &sequence {
            if let Outcome::Err(e) = self.send_message(cx, msg).await {
                return Outcome::Err(e);
            }
        }

        let mut columns: Option<(Arc<ColumnInfo>, Vec<u32>)> = None;
        let mut rows: Vec<Row> = Vec::new();
        let mut command_tag: Option<String> = None;
        let mut error: Option<ErrorFields> = None;

        loop {
            let msg = match self.receive_message(cx).await {
                Outcome::Ok(m) => m,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            match msg {
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::ParameterDescription
                | BackendMessage::NoData
                | BackendMessage::PortalSuspended
                | BackendMessage::EmptyQueryResponse
                | BackendMessage::NoticeResponse(_) => {}
                BackendMessage::RowDescription(fields) => {
                    let names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
                    let oids: Vec<u32> = fields.iter().map(|f| f.type_oid).collect();
                    columns = Some((Arc::new(ColumnInfo::new(names)), oids));
                }
                BackendMessage::DataRow(raw) => {
                    let Some((cols, oids)) = &columns else {
                        return Outcome::Err(protocol_error(
                            "DataRow received before RowDescription",
                        ));
                    };
                    if raw.len() != oids.len() {
                        return Outcome::Err(protocol_error("DataRow field count mismatch"));
                    }
                    let mut values = Vec::with_capacity(raw.len());
                    for (i, cell) in raw.into_iter().enumerate() {
                        match decode_value(oids[i], cell.as_deref()) {
                            Ok(v) => values.push(v),
                            Err(e) => return Outcome::Err(e),
                        }
                    }
                    rows.push(Row::with_columns(Arc::clone(cols), values));
                }
                BackendMessage::CommandComplete(tag) => {
                    command_tag = Some(tag);
                }
                BackendMessage::ErrorResponse(fields) => {
                    // Keep draining until ReadyForQuery so the session stays
                    // usable for the next statement.
                    error = Some(fields);
                }
                BackendMessage::ReadyForQuery(_) => break,
                other => {
                    return Outcome::Err(protocol_error(format!(
                        "unexpected message during query: {other:?}"
                    )));
                }
            }
        }

        match error {
            Some(fields) => Outcome::Err(error_from_fields(&fields)),
            None => Outcome::Ok(PgQueryResult { rows, command_tag }),
        }
    }

    // ==================== Startup + auth ====================

    async fn handle_auth(&mut self) -> Outcome<(), Error> {
        loop {
            let msg = match self.receive_message_no_cx().await {
                Outcome::Ok(m) => m,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            match msg {
                BackendMessage::AuthenticationOk => return Outcome::Ok(()),
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = match self.require_password() {
                        Ok(p) => p.to_string(),
                        Err(e) => return Outcome::Err(e),
                    };
                    if let Outcome::Err(e) = self
                        .send_message_no_cx(&FrontendMessage::Password(password))
                        .await
                    {
                        return Outcome::Err(e);
                    }
                }
                BackendMessage::AuthenticationMd5Password(salt) => {
                    let password = match self.require_password() {
                        Ok(p) => p.to_string(),
                        Err(e) => return Outcome::Err(e),
                    };
                    let hash = md5_password(&self.config.user, &password, salt);
                    if let Outcome::Err(e) = self
                        .send_message_no_cx(&FrontendMessage::Password(hash))
                        .await
                    {
                        return Outcome::Err(e);
                    }
                }
                BackendMessage::AuthenticationSasl(mechanisms) => {
                    return Outcome::Err(auth_error(format!(
                        "SASL authentication not supported (server offered {mechanisms:?}); \
                         configure password or md5 auth"
                    )));
                }
                BackendMessage::ErrorResponse(fields) => {
                    return Outcome::Err(error_from_fields(&fields));
                }
                other => {
                    return Outcome::Err(protocol_error(format!(
                        "unexpected message during auth: {other:?}"
                    )));
                }
            }
        }
    }

    fn require_password(&self) -> Result<&str, Error> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| auth_error("server requires a password but none is configured"))
    }

    async fn read_startup_messages(&mut self) -> Outcome<(), Error> {
        loop {
            let msg = match self.receive_message_no_cx().await {
                Outcome::Ok(m) => m,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            match msg {
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery(_) => return Outcome::Ok(()),
                BackendMessage::ErrorResponse(fields) => {
                    return Outcome::Err(error_from_fields(&fields));
                }
                BackendMessage::NoticeResponse(_) => {}
                other => {
                    return Outcome::Err(protocol_error(format!(
                        "unexpected startup message: {other:?}"
                    )));
                }
            }
        }
    }

    // ==================== I/O ====================

    async fn send_message(&mut self, cx: &Cx, msg: &FrontendMessage) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        self.send_message_no_cx(msg).await
    }

    async fn receive_message(&mut self, cx: &Cx) -> Outcome<BackendMessage, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        self.receive_message_no_cx().await
    }

    async fn send_message_no_cx(&mut self, msg: &FrontendMessage) -> Outcome<(), Error> {
        let mut data = Vec::new();
        msg.encode(&mut data);

        let mut written = 0;
        while written < data.len() {
            match std::future::poll_fn(|task_cx| {
                std::pin::Pin::new(&mut self.stream).poll_write(task_cx, &data[written..])
            })
            .await
            {
                Ok(0) => {
                    return Outcome::Err(disconnected("connection closed while writing"));
                }
                Ok(n) => written += n,
                Err(e) => {
                    return Outcome::Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: format!("failed to write to server: {e}"),
                        source: Some(Box::new(e)),
                    }));
                }
            }
        }

        match std::future::poll_fn(|task_cx| std::pin::Pin::new(&mut self.stream).poll_flush(task_cx))
            .await
        {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("failed to flush stream: {e}"),
                source: Some(Box::new(e)),
            })),
        }
    }

    async fn receive_message_no_cx(&mut self) -> Outcome<BackendMessage, Error> {
        loop {
            match self.reader.next_message() {
                Ok(Some(msg)) => return Outcome::Ok(msg),
                Ok(None) => {}
                Err(e) => return Outcome::Err(protocol_error(format!("{e}"))),
            }

            let mut read_buf = ReadBuf::new(&mut self.read_buf);
            match std::future::poll_fn(|task_cx| {
                std::pin::Pin::new(&mut self.stream).poll_read(task_cx, &mut read_buf)
            })
            .await
            {
                Ok(()) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        return Outcome::Err(disconnected("connection closed by server"));
                    }
                    let data = filled.to_vec();
                    self.reader.feed(&data);
                }
                Err(e) => {
                    return Outcome::Err(match e.kind() {
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                            Error::Timeout
                        }
                        _ => Error::Connection(ConnectionError {
                            kind: ConnectionErrorKind::Disconnected,
                            message: format!("failed to read from server: {e}"),
                            source: Some(Box::new(e)),
                        }),
                    });
                }
            }
        }
    }
}

/// Shared, cloneable PostgreSQL connection with interior mutability.
///
/// This is the type the pool stores and the executor talks to.
pub struct SharedPgConnection {
    inner: Arc<Mutex<PgConnection>>,
}

impl SharedPgConnection {
    /// Connect and wrap the session for shared use.
    pub async fn connect(cx: &Cx, config: PgConfig) -> Outcome<Self, Error> {
        match PgConnection::connect(cx, config).await {
            Outcome::Ok(conn) => Outcome::Ok(Self {
                inner: Arc::new(Mutex::new(conn)),
            }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Connect outside any cancellation scope (pool factories run detached).
    pub async fn connect_detached(config: PgConfig) -> Outcome<Self, Error> {
        match PgConnection::connect_detached(config).await {
            Outcome::Ok(conn) => Outcome::Ok(Self {
                inner: Arc::new(Mutex::new(conn)),
            }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl Clone for SharedPgConnection {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for SharedPgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPgConnection").finish_non_exhaustive()
    }
}

impl Connection for SharedPgConnection {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let inner = Arc::clone(&self.inner);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let Ok(mut guard) = inner.lock(cx).await else {
                return Outcome::Err(lock_error());
            };
            guard.query_async(cx, &sql, &params).await
        }
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let inner = Arc::clone(&self.inner);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let Ok(mut guard) = inner.lock(cx).await else {
                return Outcome::Err(lock_error());
            };
            guard.execute_async(cx, &sql, &params).await
        }
    }
}

// ==================== Helpers ====================

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError::new(msg))
}

fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError::new(
        ConnectionErrorKind::Authentication,
        msg,
    ))
}

fn disconnected(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError::new(ConnectionErrorKind::Disconnected, msg))
}

fn lock_error() -> Error {
    Error::Connection(ConnectionError::new(
        ConnectionErrorKind::Disconnected,
        "failed to acquire connection lock",
    ))
}

fn error_from_fields(fields: &ErrorFields) -> Error {
    let kind = match fields.code.get(..2) {
        Some("08") => {
            return Error::Connection(ConnectionError::new(
                ConnectionErrorKind::Connect,
                fields.message.clone(),
            ));
        }
        Some("28") => {
            return Error::Connection(ConnectionError::new(
                ConnectionErrorKind::Authentication,
                fields.message.clone(),
            ));
        }
        Some("42") => QueryErrorKind::Syntax,
        Some("23") => QueryErrorKind::Constraint,
        Some("40") => {
            if fields.code == "40001" {
                QueryErrorKind::Serialization
            } else {
                QueryErrorKind::Deadlock
            }
        }
        Some("57") => {
            if fields.code == "57014" {
                QueryErrorKind::Cancelled
            } else {
                QueryErrorKind::Timeout
            }
        }
        _ => QueryErrorKind::Database,
    };

    Error::Query(QueryError {
        kind,
        message: fields.message.clone(),
        sqlstate: if fields.code.is_empty() {
            None
        } else {
            Some(fields.code.clone())
        },
        detail: fields.detail.clone(),
        hint: fields.hint.clone(),
        position: fields.position,
    })
}

fn parse_rows_affected(tag: Option<&str>) -> Option<u64> {
    tag?.split_whitespace()
        .next_back()
        .and_then(|last| last.parse().ok())
}

fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    use std::fmt::Write;

    let inner_hash = md5::compute(format!("{password}{user}").as_bytes());
    let mut outer_input = format!("{inner_hash:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    let outer_hash = md5::compute(&outer_input);

    let mut result = String::with_capacity(35);
    result.push_str("md5");
    write!(&mut result, "{outer_hash:x}").expect("write to string");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_password_shape() {
        let hash = md5_password("app", "secret", [1, 2, 3, 4]);
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 35);
        // Deterministic for identical inputs, sensitive to the salt.
        assert_eq!(hash, md5_password("app", "secret", [1, 2, 3, 4]));
        assert_ne!(hash, md5_password("app", "secret", [4, 3, 2, 1]));
    }

    #[test]
    fn rows_affected_from_tags() {
        assert_eq!(parse_rows_affected(Some("UPDATE 3")), Some(3));
        assert_eq!(parse_rows_affected(Some("INSERT 0 1")), Some(1));
        assert_eq!(parse_rows_affected(Some("BEGIN")), None);
        assert_eq!(parse_rows_affected(None), None);
    }

    #[test]
    fn sqlstate_class_mapping() {
        let fields = ErrorFields {
            severity: "ERROR".to_string(),
            code: "42P01".to_string(),
            message: "relation \"t\" does not exist".to_string(),
            ..Default::default()
        };
        let err = error_from_fields(&fields);
        assert!(err.is_undefined_table());
        let Error::Query(q) = err else {
            panic!("expected query error");
        };
        assert_eq!(q.kind, QueryErrorKind::Syntax);
    }

    #[test]
    fn auth_class_maps_to_connection_error() {
        let fields = ErrorFields {
            code: "28P01".to_string(),
            message: "password authentication failed".to_string(),
            ..Default::default()
        };
        let err = error_from_fields(&fields);
        assert!(matches!(
            err,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Authentication,
                ..
            })
        ));
    }
}
