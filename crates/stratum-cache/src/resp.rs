//! Redis-protocol cache backend.
//!
//! A minimal RESP2 client over asupersync's TCP stream, hand-written the
//! same way the PostgreSQL driver is: encode a command array, read until one
//! complete reply has been buffered. Only the commands the cache layer needs
//! are issued (GET/SET/SETNX/DEL/INCR/EXPIRE).

use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use stratum_core::error::{ConnectionError, ConnectionErrorKind, Error, ProtocolError};

use crate::store::CacheBackend;

/// One decoded RESP reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK`-style simple string.
    Simple(String),
    /// `-ERR ...` error reply.
    Error(String),
    /// `:n` integer reply.
    Int(i64),
    /// `$`-prefixed bulk string, `None` for the nil reply.
    Bulk(Option<String>),
    /// `*`-prefixed array of replies.
    Array(Vec<RespValue>),
}

struct RespConn {
    stream: TcpStream,
    buf: Vec<u8>,
    read_buf: Vec<u8>,
}

/// Cache backend speaking the Redis protocol.
pub struct RespBackend {
    inner: Arc<Mutex<RespConn>>,
}

impl std::fmt::Debug for RespBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespBackend").finish_non_exhaustive()
    }
}

impl Clone for RespBackend {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RespBackend {
    /// Connect to `addr` (`host:port`).
    pub async fn connect(cx: &Cx, addr: &str, timeout: Duration) -> Outcome<Self, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let socket_addr = match resolve(addr) {
            Ok(a) => a,
            Err(e) => {
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("cannot resolve cache endpoint {addr}: {e}"),
                    source: Some(Box::new(e)),
                }));
            }
        };

        let stream = match TcpStream::connect_timeout(socket_addr, timeout).await {
            Ok(s) => s,
            Err(e) => {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind,
                    message: format!("failed to connect to cache at {socket_addr}: {e}"),
                    source: Some(Box::new(e)),
                }));
            }
        };
        stream.set_nodelay(true).ok();

        Outcome::Ok(Self {
            inner: Arc::new(Mutex::new(RespConn {
                stream,
                buf: Vec::new(),
                read_buf: vec![0u8; 4096],
            })),
        })
    }

    /// Issue one command and return its reply. Error replies surface as
    /// protocol errors; the store treats them like any other backend
    /// failure.
    pub async fn command(&self, cx: &Cx, args: &[&str]) -> Outcome<RespValue, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::Connection(ConnectionError::new(
                ConnectionErrorKind::Disconnected,
                "failed to acquire cache connection lock",
            )));
        };

        if let Err(e) = guard.send_command(args).await {
            return Outcome::Err(e);
        }
        match guard.read_reply().await {
            Ok(RespValue::Error(msg)) => Outcome::Err(Error::Protocol(ProtocolError::new(
                format!("cache server error: {msg}"),
            ))),
            Ok(reply) => Outcome::Ok(reply),
            Err(e) => Outcome::Err(e),
        }
    }
}

impl RespConn {
    async fn send_command(&mut self, args: &[&str]) -> Result<(), Error> {
        let mut data = Vec::with_capacity(32);
        data.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            data.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            data.extend_from_slice(arg.as_bytes());
            data.extend_from_slice(b"\r\n");
        }

        let mut written = 0;
        while written < data.len() {
            match std::future::poll_fn(|task_cx| {
                std::pin::Pin::new(&mut self.stream).poll_write(task_cx, &data[written..])
            })
            .await
            {
                Ok(0) => return Err(disconnected("cache connection closed while writing")),
                Ok(n) => written += n,
                Err(e) => {
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: format!("failed to write to cache: {e}"),
                        source: Some(Box::new(e)),
                    }));
                }
            }
        }

        std::future::poll_fn(|task_cx| std::pin::Pin::new(&mut self.stream).poll_flush(task_cx))
            .await
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!("failed to flush cache stream: {e}"),
                    source: Some(Box::new(e)),
                })
            })
    }

    async fn read_reply(&mut self) -> Result<RespValue, Error> {
        loop {
            if let Some((reply, consumed)) = parse_reply(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(reply);
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
                        return Err(disconnected("cache connection closed by server"));
                    }
                    let data = filled.to_vec();
                    self.buf.extend_from_slice(&data);
                }
                Err(e) => {
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Disconnected,
                        message: format!("failed to read from cache: {e}"),
                        source: Some(Box::new(e)),
                    }));
                }
            }
        }
    }
}

/// Parse one reply from the front of `buf`. `None` means incomplete.
fn parse_reply(buf: &[u8]) -> Result<Option<(RespValue, usize)>, Error> {
    let Some((line, line_end)) = read_line(buf, 0) else {
        return Ok(None);
    };
    let (prefix, rest) = line.split_at(1);

    match prefix {
        "+" => Ok(Some((RespValue::Simple(rest.to_string()), line_end))),
        "-" => Ok(Some((RespValue::Error(rest.to_string()), line_end))),
        ":" => {
            let n = rest
                .parse()
                .map_err(|_| bad_reply(format!("non-integer reply: {rest}")))?;
            Ok(Some((RespValue::Int(n), line_end)))
        }
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| bad_reply(format!("bad bulk length: {rest}")))?;
            if len < 0 {
                return Ok(Some((RespValue::Bulk(None), line_end)));
            }
            let len = len as usize;
            if buf.len() < line_end + len + 2 {
                return Ok(None);
            }
            let body = String::from_utf8(buf[line_end..line_end + len].to_vec())
                .map_err(|_| bad_reply("non-utf8 bulk string"))?;
            Ok(Some((RespValue::Bulk(Some(body)), line_end + len + 2)))
        }
        "*" => {
            let count: i64 = rest
                .parse()
                .map_err(|_| bad_reply(format!("bad array length: {rest}")))?;
            if count < 0 {
                return Ok(Some((RespValue::Array(Vec::new()), line_end)));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut pos = line_end;
            for _ in 0..count {
                match parse_reply(&buf[pos..])? {
                    Some((item, consumed)) => {
                        items.push(item);
                        pos += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(items), pos)))
        }
        other => Err(bad_reply(format!("unknown reply prefix: {other:?}"))),
    }
}

fn read_line(buf: &[u8], start: usize) -> Option<(String, usize)> {
    let slice = &buf[start..];
    let end = slice.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8(slice[..end].to_vec()).ok()?;
    if line.is_empty() {
        return None;
    }
    Some((line, start + end + 2))
}

fn bad_reply(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError::new(msg))
}

fn disconnected(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError::new(ConnectionErrorKind::Disconnected, msg))
}

fn resolve(addr: &str) -> std::io::Result<SocketAddr> {
    if let Ok(parsed) = addr.parse() {
        return Ok(parsed);
    }
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {addr}"))
    })
}

impl CacheBackend for RespBackend {
    fn get(
        &self,
        cx: &Cx,
        key: &str,
    ) -> impl Future<Output = Outcome<Option<String>, Error>> + Send {
        let this = self.clone();
        let key = key.to_string();
        async move {
            match this.command(cx, &["GET", &key]).await {
                Outcome::Ok(RespValue::Bulk(value)) => Outcome::Ok(value),
                Outcome::Ok(other) => Outcome::Err(bad_reply(format!("GET returned {other:?}"))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn set(
        &self,
        cx: &Cx,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let this = self.clone();
        let key = key.to_string();
        let value = value.to_string();
        let secs = ttl.as_secs().max(1).to_string();
        async move {
            match this.command(cx, &["SET", &key, &value, "EX", &secs]).await {
                Outcome::Ok(_) => Outcome::Ok(()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn add(
        &self,
        cx: &Cx,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let this = self.clone();
        let key = key.to_string();
        let value = value.to_string();
        async move {
            match this.command(cx, &["SETNX", &key, &value]).await {
                Outcome::Ok(RespValue::Int(n)) => Outcome::Ok(n == 1),
                Outcome::Ok(other) => Outcome::Err(bad_reply(format!("SETNX returned {other:?}"))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn delete(&self, cx: &Cx, key: &str) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let this = self.clone();
        let key = key.to_string();
        async move {
            match this.command(cx, &["DEL", &key]).await {
                Outcome::Ok(RespValue::Int(n)) => Outcome::Ok(n.max(0) as u64),
                Outcome::Ok(other) => Outcome::Err(bad_reply(format!("DEL returned {other:?}"))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn increment(&self, cx: &Cx, key: &str) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let this = self.clone();
        let key = key.to_string();
        async move {
            match this.command(cx, &["INCR", &key]).await {
                Outcome::Ok(RespValue::Int(n)) => Outcome::Ok(n),
                Outcome::Ok(other) => Outcome::Err(bad_reply(format!("INCR returned {other:?}"))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn expire(
        &self,
        cx: &Cx,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let this = self.clone();
        let key = key.to_string();
        let secs = ttl.as_secs().max(1).to_string();
        async move {
            match this.command(cx, &["EXPIRE", &key, &secs]).await {
                Outcome::Ok(RespValue::Int(n)) => Outcome::Ok(n == 1),
                Outcome::Ok(other) => Outcome::Err(bad_reply(format!("EXPIRE returned {other:?}"))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}
