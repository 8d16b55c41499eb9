//! PostgreSQL wire protocol codec (protocol 3.0, text format).
//!
//! Covers the subset this driver speaks: startup, cleartext/MD5 password
//! authentication, and the extended query protocol. Everything is text
//! format; binary result columns are not requested.

use std::fmt;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196_608; // 3 << 16

// ==================== Frontend messages ====================

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// First message after connecting; carries no type byte.
    Startup {
        /// Connection parameters (user, database, ...).
        params: Vec<(String, String)>,
    },
    /// Password response (cleartext or md5-hashed).
    Password(String),
    /// Parse the unnamed statement. Parameter types are left to the server.
    Parse {
        /// SQL with `$1`, `$2`, ... placeholders.
        query: String,
    },
    /// Bind the unnamed portal with text-format parameters.
    Bind {
        /// Parameter values, `None` for NULL.
        params: Vec<Option<Vec<u8>>>,
    },
    /// Describe the unnamed portal.
    Describe,
    /// Execute the unnamed portal to completion.
    Execute,
    /// End of the extended-query sequence; requests ReadyForQuery.
    Sync,
    /// Close the session.
    Terminate,
}

impl FrontendMessage {
    /// Encode this message into `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            FrontendMessage::Startup { params } => {
                let start = begin_untyped(buf);
                buf.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
                for (key, value) in params {
                    put_cstring(buf, key);
                    put_cstring(buf, value);
                }
                buf.push(0);
                finish_untyped(buf, start);
            }
            FrontendMessage::Password(password) => {
                let start = begin(buf, b'p');
                put_cstring(buf, password);
                finish(buf, start);
            }
            FrontendMessage::Parse { query } => {
                let start = begin(buf, b'P');
                put_cstring(buf, ""); // unnamed statement
                put_cstring(buf, query);
                buf.extend_from_slice(&0i16.to_be_bytes()); // infer parameter types
                finish(buf, start);
            }
            FrontendMessage::Bind { params } => {
                let start = begin(buf, b'B');
                put_cstring(buf, ""); // unnamed portal
                put_cstring(buf, ""); // unnamed statement
                // One format code: text for every parameter.
                if params.is_empty() {
                    buf.extend_from_slice(&0i16.to_be_bytes());
                } else {
                    buf.extend_from_slice(&1i16.to_be_bytes());
                    buf.extend_from_slice(&0i16.to_be_bytes());
                }
                buf.extend_from_slice(&(params.len() as i16).to_be_bytes());
                for param in params {
                    match param {
                        None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
                        Some(bytes) => {
                            buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                            buf.extend_from_slice(bytes);
                        }
                    }
                }
                buf.extend_from_slice(&0i16.to_be_bytes()); // default (text) result formats
                finish(buf, start);
            }
            FrontendMessage::Describe => {
                let start = begin(buf, b'D');
                buf.push(b'P');
                put_cstring(buf, "");
                finish(buf, start);
            }
            FrontendMessage::Execute => {
                let start = begin(buf, b'E');
                put_cstring(buf, "");
                buf.extend_from_slice(&0i32.to_be_bytes()); // no row limit
                finish(buf, start);
            }
            FrontendMessage::Sync => {
                let start = begin(buf, b'S');
                finish(buf, start);
            }
            FrontendMessage::Terminate => {
                let start = begin(buf, b'X');
                finish(buf, start);
            }
        }
    }
}

fn begin(buf: &mut Vec<u8>, ty: u8) -> usize {
    buf.push(ty);
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    start
}

fn begin_untyped(buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    start
}

fn finish(buf: &mut Vec<u8>, start: usize) {
    finish_untyped(buf, start);
}

fn finish_untyped(buf: &mut Vec<u8>, start: usize) {
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

// ==================== Backend messages ====================

/// One result-set column description.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    /// Column name.
    pub name: String,
    /// Type OID.
    pub type_oid: u32,
}

/// Error/notice fields the server reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorFields {
    /// Severity (ERROR, FATAL, ...).
    pub severity: String,
    /// Five-character SQLSTATE.
    pub code: String,
    /// Primary message.
    pub message: String,
    /// Optional detail.
    pub detail: Option<String>,
    /// Optional hint.
    pub hint: Option<String>,
    /// 1-based position in the statement text.
    pub position: Option<usize>,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication accepted.
    AuthenticationOk,
    /// Server wants the password in cleartext.
    AuthenticationCleartextPassword,
    /// Server wants an MD5-hashed password with this salt.
    AuthenticationMd5Password([u8; 4]),
    /// Server wants SASL (not supported by this driver).
    AuthenticationSasl(Vec<String>),
    /// Process id + secret key for out-of-band cancellation.
    BackendKeyData {
        /// Server process id.
        process_id: i32,
        /// Cancellation secret.
        secret_key: i32,
    },
    /// Reported session parameter.
    ParameterStatus {
        /// Parameter name.
        name: String,
        /// Parameter value.
        value: String,
    },
    /// Server is ready; the byte is the transaction status indicator.
    ReadyForQuery(u8),
    /// Result-set column descriptions.
    RowDescription(Vec<FieldDescription>),
    /// One data row; `None` per NULL column.
    DataRow(Vec<Option<Vec<u8>>>),
    /// Statement finished; carries the command tag.
    CommandComplete(String),
    /// The statement text was empty.
    EmptyQueryResponse,
    /// Parse finished.
    ParseComplete,
    /// Bind finished.
    BindComplete,
    /// Statement parameter descriptions (ignored).
    ParameterDescription,
    /// The portal returns no rows.
    NoData,
    /// Row limit reached (never requested by this driver).
    PortalSuspended,
    /// The server rejected something.
    ErrorResponse(ErrorFields),
    /// A warning; does not terminate the exchange.
    NoticeResponse(ErrorFields),
}

/// Codec failures while decoding backend messages.
#[derive(Debug)]
pub enum CodecError {
    /// Invalid length prefix.
    InvalidLength(i32),
    /// Frame larger than the configured cap.
    MessageTooLarge(usize),
    /// Unknown message type byte.
    UnknownMessageType(u8),
    /// A string field was not valid UTF-8.
    Utf8,
    /// Frame ended mid-field.
    UnexpectedEof,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidLength(len) => write!(f, "invalid message length: {len}"),
            CodecError::MessageTooLarge(len) => write!(f, "message too large: {len} bytes"),
            CodecError::UnknownMessageType(ty) => write!(f, "unknown message type: 0x{ty:02x}"),
            CodecError::Utf8 => write!(f, "invalid utf-8 in message"),
            CodecError::UnexpectedEof => write!(f, "unexpected end of message"),
        }
    }
}

impl std::error::Error for CodecError {}

const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Incremental decoder for backend messages.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    /// A reader with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read off the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to decode the next complete message, `None` when more bytes are
    /// needed.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>, CodecError> {
        if self.buf.len() < 5 {
            return Ok(None);
        }
        let length = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        if length < 4 {
            return Err(CodecError::InvalidLength(length));
        }
        let total = length as usize + 1;
        if total > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(total));
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        let ty = self.buf[0];
        let payload: Vec<u8> = self.buf[5..total].to_vec();
        self.buf.drain(..total);
        parse_message(ty, &payload).map(Some)
    }
}

fn parse_message(ty: u8, payload: &[u8]) -> Result<BackendMessage, CodecError> {
    let mut cur = Cursor::new(payload);
    match ty {
        b'R' => match cur.read_i32()? {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(cur.read_bytes(4)?);
                Ok(BackendMessage::AuthenticationMd5Password(salt))
            }
            10 => {
                let mut mechanisms = Vec::new();
                while let Ok(s) = cur.read_cstring() {
                    if s.is_empty() {
                        break;
                    }
                    mechanisms.push(s);
                }
                Ok(BackendMessage::AuthenticationSasl(mechanisms))
            }
            other => Err(CodecError::UnknownMessageType(other as u8)),
        },
        b'K' => Ok(BackendMessage::BackendKeyData {
            process_id: cur.read_i32()?,
            secret_key: cur.read_i32()?,
        }),
        b'S' => Ok(BackendMessage::ParameterStatus {
            name: cur.read_cstring()?,
            value: cur.read_cstring()?,
        }),
        b'Z' => Ok(BackendMessage::ReadyForQuery(cur.read_u8()?)),
        b'T' => {
            let count = cur.read_i16()?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = cur.read_cstring()?;
                let _table_oid = cur.read_i32()?;
                let _attnum = cur.read_i16()?;
                let type_oid = cur.read_i32()? as u32;
                let _typlen = cur.read_i16()?;
                let _typmod = cur.read_i32()?;
                let _format = cur.read_i16()?;
                fields.push(FieldDescription { name, type_oid });
            }
            Ok(BackendMessage::RowDescription(fields))
        }
        b'D' => {
            let count = cur.read_i16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let len = cur.read_i32()?;
                if len < 0 {
                    values.push(None);
                } else {
                    values.push(Some(cur.read_bytes(len as usize)?.to_vec()));
                }
            }
            Ok(BackendMessage::DataRow(values))
        }
        b'C' => Ok(BackendMessage::CommandComplete(cur.read_cstring()?)),
        b'I' => Ok(BackendMessage::EmptyQueryResponse),
        b'1' => Ok(BackendMessage::ParseComplete),
        b'2' => Ok(BackendMessage::BindComplete),
        b't' => Ok(BackendMessage::ParameterDescription),
        b'n' => Ok(BackendMessage::NoData),
        b's' => Ok(BackendMessage::PortalSuspended),
        b'E' => Ok(BackendMessage::ErrorResponse(parse_error_fields(&mut cur)?)),
        b'N' => Ok(BackendMessage::NoticeResponse(parse_error_fields(&mut cur)?)),
        other => Err(CodecError::UnknownMessageType(other)),
    }
}

fn parse_error_fields(cur: &mut Cursor<'_>) -> Result<ErrorFields, CodecError> {
    let mut fields = ErrorFields::default();
    loop {
        let code = cur.read_u8()?;
        if code == 0 {
            break;
        }
        let value = cur.read_cstring()?;
        match code {
            b'S' => fields.severity = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = value.parse().ok(),
            _ => {}
        }
    }
    Ok(fields)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let b = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_i16(&mut self) -> Result<i16, CodecError> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_cstring(&mut self) -> Result<String, CodecError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnexpectedEof)?;
        let s = String::from_utf8(rest[..end].to_vec()).map_err(|_| CodecError::Utf8)?;
        self.pos += end + 1;
        Ok(s)
    }
}
