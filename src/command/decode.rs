//! Reply decoders.
//!
//! Each decoder receives a non-error reply; error replies are intercepted by
//! [`CommandDescriptor::decode_reply`](super::CommandDescriptor::decode_reply).

use crate::cluster::node::{parse_cluster_nodes, ClusterNode};
use crate::error::{Result, RouterError};
use crate::protocol::RespValue;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One page of a `SCAN` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Continuation token; `"0"` ends the iteration
    pub cursor: String,
    pub keys: Vec<Bytes>,
}

/// One connection entry of `CLIENT LIST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub fields: BTreeMap<String, String>,
}

impl ClientInfo {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn id(&self) -> Option<u64> {
        self.get("id")?.parse().ok()
    }

    pub fn addr(&self) -> Option<&str> {
        self.get("addr")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").filter(|n| !n.is_empty())
    }
}

fn unexpected(expected: &str, got: &RespValue) -> RouterError {
    RouterError::Protocol(format!("expected {}, got {}", expected, got.type_name()))
}

fn text(value: &RespValue) -> Result<String> {
    value
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| unexpected("string", value))
}

/// Status replies such as `+OK` or `+Background saving started`.
pub fn decode_status(value: RespValue) -> Result<()> {
    match value {
        RespValue::SimpleString(_) | RespValue::BulkString(Some(_)) => Ok(()),
        other => Err(unexpected("status", &other)),
    }
}

pub fn decode_string(value: RespValue) -> Result<String> {
    text(&value)
}

pub fn decode_integer(value: RespValue) -> Result<i64> {
    match value {
        RespValue::Integer(i) => Ok(i),
        other => Err(unexpected("integer", &other)),
    }
}

/// `:1` / `:0` replies.
pub fn decode_bool(value: RespValue) -> Result<bool> {
    decode_integer(value).map(|i| i == 1)
}

pub fn decode_optional_bytes(value: RespValue) -> Result<Option<Bytes>> {
    match value {
        RespValue::BulkString(b) => Ok(b),
        RespValue::SimpleString(s) => Ok(Some(Bytes::from(s))),
        other => Err(unexpected("bulk string", &other)),
    }
}

/// `SET` answers `+OK`, or a null bulk when a condition prevented the write.
pub fn decode_set_reply(value: RespValue) -> Result<bool> {
    match value {
        RespValue::SimpleString(_) => Ok(true),
        RespValue::BulkString(None) => Ok(false),
        other => Err(unexpected("status or null", &other)),
    }
}

pub fn decode_key_list(value: RespValue) -> Result<Vec<Bytes>> {
    match value {
        RespValue::Array(Some(items)) => items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(Some(b)) => Ok(b),
                RespValue::SimpleString(s) => Ok(Bytes::from(s)),
                other => Err(unexpected("key", &other)),
            })
            .collect(),
        RespValue::Array(None) => Ok(Vec::new()),
        other => Err(unexpected("array", &other)),
    }
}

/// `key:value` lines (`INFO`, `CLUSTER INFO`); `#` section headers are skipped.
pub fn decode_info(value: RespValue) -> Result<HashMap<String, String>> {
    let body = text(&value)?;
    Ok(body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

/// Flat `[name, value, name, value, ...]` array of `CONFIG GET`.
pub fn decode_config_pairs(value: RespValue) -> Result<HashMap<String, String>> {
    let items = match value {
        RespValue::Array(Some(items)) => items,
        other => return Err(unexpected("array", &other)),
    };
    if items.len() % 2 != 0 {
        return Err(RouterError::Protocol(
            "CONFIG GET returned an odd number of elements".to_string(),
        ));
    }
    items
        .chunks(2)
        .map(|pair| Ok((text(&pair[0])?, text(&pair[1])?)))
        .collect()
}

/// `TIME` returns `[seconds, microseconds]`; folded into milliseconds.
pub fn decode_time_millis(value: RespValue) -> Result<u64> {
    let items = match value {
        RespValue::Array(Some(items)) if items.len() == 2 => items,
        other => return Err(unexpected("two-element array", &other)),
    };
    let parse = |v: &RespValue| {
        v.as_integer()
            .filter(|i| *i >= 0)
            .map(|i| i as u64)
            .ok_or_else(|| unexpected("non-negative integer", v))
    };
    let seconds = parse(&items[0])?;
    let micros = parse(&items[1])?;
    seconds
        .checked_mul(1000)
        .and_then(|ms| ms.checked_add(micros / 1000))
        .ok_or_else(|| RouterError::Protocol(format!("TIME out of range: {}s", seconds)))
}

/// One `k=v k=v ...` line per client.
pub fn decode_client_list(value: RespValue) -> Result<Vec<ClientInfo>> {
    let body = text(&value)?;
    Ok(body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| ClientInfo {
            fields: line
                .split(' ')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect())
}

/// `[cursor, [key, ...]]`
pub fn decode_scan_page(value: RespValue) -> Result<ScanPage> {
    let mut items = match value {
        RespValue::Array(Some(items)) if items.len() == 2 => items,
        other => return Err(unexpected("two-element array", &other)),
    };
    let keys = decode_key_list(items.pop().unwrap_or(RespValue::Array(None)))?;
    let cursor = text(&items[0])?;
    Ok(ScanPage { cursor, keys })
}

pub fn decode_cluster_nodes(value: RespValue) -> Result<Vec<ClusterNode>> {
    Ok(parse_cluster_nodes(&text(&value)?))
}
