//! Incremental RESP2 reply decoder.
//!
//! A frame is first measured without building anything; values are only
//! constructed once every byte of it has arrived, as zero-copy slices of
//! the consumed buffer.

use super::RespValue;
use crate::error::{Result, RouterError};
use bytes::{Bytes, BytesMut};

/// Largest reply frame accepted (512 MB, the server's bulk string limit).
pub const MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Try to decode one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; the buffer is left
/// untouched in that case. On success the consumed bytes are removed.
/// Frames announcing more than [`MAX_FRAME_SIZE`] bytes are rejected with
/// [`RouterError::Protocol`].
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<RespValue>> {
    let Some(len) = frame_len(&buf[..], 0)? else {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(too_large(buf.len()));
        }
        return Ok(None);
    };
    if len > MAX_FRAME_SIZE {
        return Err(too_large(len));
    }
    let frame = buf.split_to(len).freeze();
    let (value, _) = build_value(&frame, 0)?;
    Ok(Some(value))
}

enum Header<'a> {
    Simple(&'a [u8]),
    Error(&'a [u8]),
    Integer(i64),
    Bulk(Option<usize>),
    Array(Option<usize>),
}

/// Type line at `pos` and the offset just after it.
fn read_header(src: &[u8], pos: usize) -> Result<Option<(Header<'_>, usize)>> {
    let Some((line, next)) = read_line(src, pos) else {
        return Ok(None);
    };
    if line.is_empty() {
        return Err(RouterError::Protocol("empty line".to_string()));
    }

    let body = &line[1..];
    let header = match line[0] {
        b'+' => Header::Simple(body),
        b'-' => Header::Error(body),
        b':' => Header::Integer(parse_int(body)?),
        b'$' => Header::Bulk(parse_len(body)?),
        b'*' => Header::Array(parse_len(body)?),
        other => {
            return Err(RouterError::Protocol(format!(
                "invalid RESP type byte: 0x{:02x}",
                other
            )))
        }
    };
    Ok(Some((header, next)))
}

/// End offset of the frame starting at `pos`, or `None` if incomplete.
fn frame_len(src: &[u8], pos: usize) -> Result<Option<usize>> {
    let Some((header, next)) = read_header(src, pos)? else {
        return Ok(None);
    };
    match header {
        Header::Bulk(Some(len)) => {
            let end = next + len + 2;
            if src.len() < end {
                return Ok(None);
            }
            if &src[next + len..end] != b"\r\n" {
                return Err(RouterError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            Ok(Some(end))
        }
        Header::Array(Some(count)) => {
            let mut cursor = next;
            for _ in 0..count {
                match frame_len(src, cursor)? {
                    Some(after) => cursor = after,
                    None => return Ok(None),
                }
            }
            Ok(Some(cursor))
        }
        _ => Ok(Some(next)),
    }
}

/// Build the value at `pos` of a frame already known to be complete.
fn build_value(frame: &Bytes, pos: usize) -> Result<(RespValue, usize)> {
    let (header, next) = read_header(frame, pos)?
        .ok_or_else(|| RouterError::Protocol("truncated frame".to_string()))?;
    let value = match header {
        Header::Simple(body) => {
            RespValue::SimpleString(String::from_utf8_lossy(body).into_owned())
        }
        Header::Error(body) => RespValue::Error(String::from_utf8_lossy(body).into_owned()),
        Header::Integer(i) => RespValue::Integer(i),
        Header::Bulk(None) => RespValue::BulkString(None),
        Header::Bulk(Some(len)) => {
            return Ok((
                RespValue::BulkString(Some(frame.slice(next..next + len))),
                next + len + 2,
            ))
        }
        Header::Array(None) => RespValue::Array(None),
        Header::Array(Some(count)) => {
            let mut items = Vec::with_capacity(count.min(1024));
            let mut cursor = next;
            for _ in 0..count {
                let (item, after) = build_value(frame, cursor)?;
                items.push(item);
                cursor = after;
            }
            return Ok((RespValue::Array(Some(items)), cursor));
        }
    };
    Ok((value, next))
}

/// Line starting at `pos`, without its CRLF, and the offset after the CRLF.
fn read_line(src: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

/// Length of a bulk string or array; `None` for the `-1` null form.
fn parse_len(body: &[u8]) -> Result<Option<usize>> {
    let len = parse_int(body)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        return Err(too_large(len));
    }
    Ok(Some(len))
}

fn too_large(len: usize) -> RouterError {
    RouterError::Protocol(format!(
        "frame of {} bytes exceeds the {} byte limit",
        len, MAX_FRAME_SIZE
    ))
}

fn parse_int(body: &[u8]) -> Result<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            RouterError::Protocol(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(body)
            ))
        })
}
