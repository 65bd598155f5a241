use std::time::Duration;

use thiserror::Error;

use crate::property::{PropertyId, PropertyValue};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("session key for {device} was discarded, rebind the device")]
    KeyInvalidated { device: String },
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(e))
    }
}

/// Socket and timing failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response within {after:?}")]
    Timeout { after: Duration },
    #[error("no probe could be sent to any discovery target")]
    NoTargets,
}

/// Failures unpacking an envelope.
///
/// `InvalidFrame` and `InvalidBase64` point at a corrupt transport; `Misaligned`,
/// `BadPadding` and `InvalidJson` are what a wrong key produces.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    InvalidFrame(serde_json::Error),
    #[error("malformed base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("ciphertext length {len} is not a multiple of the block size")]
    Misaligned { len: usize },
    #[error("padding check failed after decryption")]
    BadPadding,
    #[error("decrypted payload is not JSON: {0}")]
    InvalidJson(serde_json::Error),
    #[error("key must be 16 bytes, got {len}")]
    KeyLength { len: usize },
}

impl DecodeError {
    /// True when the failure is what decrypting with the wrong key looks like.
    pub fn suggests_wrong_key(&self) -> bool {
        matches!(
            self,
            DecodeError::Misaligned { .. } | DecodeError::BadPadding | DecodeError::InvalidJson(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("device {device} did not answer the bind request")]
    Timeout { device: String },
    #[error("device {device} did not complete binding: {reason}")]
    Unresponsive { device: String, reason: String },
    #[error("device {device} rejected binding (code {code:?}): {reason}")]
    Rejected {
        device: String,
        code: Option<i64>,
        reason: String,
    },
    #[error("handshake already finished, a fresh discovery response is required")]
    Spent,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{property:?} value {value} outside {min}..={max}")]
    OutOfRange {
        property: PropertyId,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("{property:?} value {value} is not a multiple of {step}")]
    Step { property: PropertyId, value: i64, step: i64 },
    #[error("{value:?} is not a valid value for {property:?}")]
    WrongKind {
        property: PropertyId,
        value: PropertyValue,
    },
    #[error("{0:?} is read-only")]
    ReadOnly(PropertyId),
}

/// Well-formed messages that do not match what the exchange expects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("expected `{expected}` message, got `{found}`")]
    UnexpectedType { expected: &'static str, found: String },
    #[error("{columns} columns but {values} values")]
    LengthMismatch { columns: usize, values: usize },
    #[error("device rejected the command (code {code})")]
    CommandRejected { code: i64 },
}

pub type Result<T> = std::result::Result<T, Error>;
