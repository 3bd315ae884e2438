//! RESP (REdis Serialization Protocol) support.
//!
//! Only the client half is needed here: commands are always encoded as
//! arrays of bulk strings, and replies are decoded from RESP2 frames.

mod encoder;
mod parser;

pub use encoder::encode_command;
pub use parser::decode_frame;

use bytes::Bytes;

/// RESP value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :123\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n, `None` for $-1\r\n
    BulkString(Option<Bytes>),
    /// Array: *2\r\n..., `None` for *-1\r\n
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }

    pub fn integer(i: i64) -> Self {
        RespValue::Integer(i)
    }

    pub fn bulk_string(b: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(b.into()))
    }

    pub fn null_bulk() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Short type name, used in protocol error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple-string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(Some(_)) => "bulk-string",
            RespValue::BulkString(None) => "null-bulk",
            RespValue::Array(Some(_)) => "array",
            RespValue::Array(None) => "null-array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }

    /// Byte content of a string-like value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            RespValue::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::BulkString(Some(b)) => std::str::from_utf8(b).ok()?.parse().ok(),
            RespValue::SimpleString(s) => s.parse().ok(),
            _ => None,
        }
    }
}
