use std::net::SocketAddr;

use chrono::Utc;
use serde_json::{Value, json};

use crate::codec::{Envelope, Key, encode};
use crate::error::ProtocolError;
use crate::types::DeviceDescriptor;

pub const DEFAULT_CLIENT_ID: &str = "app";

/// Unencrypted discovery probe.
pub const SCAN_PROBE: &[u8] = br#"{"t":"scan"}"#;

pub const FIRMWARE_COLUMN: &str = "hid";

const OK_CODE: i64 = 200;

pub fn bind_payload(device_id: &str) -> Value {
    json!({
        "mac": device_id,
        "t": "bind",
        "uid": 0
    })
}

pub fn status_payload(device_id: &str, columns: &[&str]) -> Value {
    json!({
        "cols": columns,
        "mac": device_id,
        "t": "status"
    })
}

pub fn command_payload(writes: &[(&str, i64)]) -> Value {
    let (opt, p): (Vec<&str>, Vec<i64>) = writes.iter().copied().unzip();
    json!({
        "opt": opt,
        "p": p,
        "t": "cmd"
    })
}

pub fn bind_message(client_id: &str, device_id: &str, generic_key: &Key) -> Envelope {
    encode(generic_key, &bind_payload(device_id))
        .with_generic_flag()
        .with_client(client_id)
        .with_target(device_id)
}

pub fn status_message(client_id: &str, device_id: &str, key: &Key, columns: &[&str]) -> Envelope {
    encode(key, &status_payload(device_id, columns))
        .with_client(client_id)
        .with_target(device_id)
}

pub fn command_message(client_id: &str, device_id: &str, key: &Key, writes: &[(&str, i64)]) -> Envelope {
    encode(key, &command_payload(writes))
        .with_client(client_id)
        .with_target(device_id)
}

pub fn message_type(pack: &Value) -> Result<&str, ProtocolError> {
    pack.get("t")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField("t"))
}

fn expect_type(pack: &Value, expected: &'static str) -> Result<(), ProtocolError> {
    let found = message_type(pack)?;
    if found != expected {
        return Err(ProtocolError::UnexpectedType {
            expected,
            found: found.to_string(),
        });
    }
    Ok(())
}

fn text(pack: &Value, field: &str) -> Option<String> {
    pack.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Descriptor from a decrypted `dev` announcement sent from `addr`.
pub fn parse_device_info(addr: SocketAddr, pack: &Value) -> Result<DeviceDescriptor, ProtocolError> {
    expect_type(pack, "dev")?;
    let id = text(pack, "mac")
        .or_else(|| text(pack, "cid"))
        .ok_or(ProtocolError::MissingField("mac"))?;
    let name = text(pack, "name").unwrap_or_else(|| id.replace(':', ""));

    Ok(DeviceDescriptor {
        addr,
        id,
        name,
        brand: text(pack, "brand"),
        model: text(pack, "model"),
        version: text(pack, "ver"),
        series: text(pack, "series"),
        discovered_at: Utc::now(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindReply {
    Bound(String),
    Rejected { code: Option<i64>, reason: String },
}

/// `None` when the payload is not a bind result at all.
pub fn parse_bind_reply(pack: &Value, device_id: &str) -> Option<BindReply> {
    let kind = message_type(pack).ok()?;
    // "bind" is the request shape itself
    if kind == "bind" || !kind.starts_with("bind") {
        return None;
    }
    if let Some(mac) = pack.get("mac").and_then(Value::as_str)
        && !mac.is_empty()
        && mac != device_id
    {
        return None;
    }

    let code = pack.get("r").and_then(Value::as_i64);
    if let Some(code) = code
        && code != OK_CODE
    {
        return Some(BindReply::Rejected {
            code: Some(code),
            reason: format!("`{kind}` with result code {code}"),
        });
    }
    match (kind, text(pack, "key")) {
        ("bindok", Some(key)) => Some(BindReply::Bound(key)),
        ("bindok", None) => Some(BindReply::Rejected {
            code,
            reason: "bindok without a key".to_string(),
        }),
        _ => Some(BindReply::Rejected {
            code,
            reason: format!("unexpected `{kind}` reply"),
        }),
    }
}

fn array<'a>(pack: &'a Value, field: &'static str) -> Result<&'a Vec<Value>, ProtocolError> {
    pack.get(field)
        .and_then(Value::as_array)
        .ok_or(ProtocolError::MissingField(field))
}

fn zip_columns(columns: &[Value], values: &[Value]) -> Result<Vec<(String, Value)>, ProtocolError> {
    if columns.len() != values.len() {
        return Err(ProtocolError::LengthMismatch {
            columns: columns.len(),
            values: values.len(),
        });
    }
    Ok(columns
        .iter()
        .zip(values)
        .filter_map(|(col, val)| col.as_str().map(|c| (c.to_string(), val.clone())))
        .collect())
}

/// Positional `cols`/`dat` pairs of a status report.
pub fn parse_status(pack: &Value) -> Result<Vec<(String, Value)>, ProtocolError> {
    expect_type(pack, "dat")?;
    zip_columns(array(pack, "cols")?, array(pack, "dat")?)
}

/// Positional `opt`/`val` pairs of a command result. Some firmware only sends `p`.
pub fn parse_command_result(pack: &Value) -> Result<Vec<(String, Value)>, ProtocolError> {
    expect_type(pack, "res")?;
    if let Some(code) = pack.get("r").and_then(Value::as_i64)
        && code != OK_CODE
    {
        return Err(ProtocolError::CommandRejected { code });
    }
    let values = array(pack, "val").or_else(|_| array(pack, "p"))?;
    zip_columns(array(pack, "opt")?, values)
}
