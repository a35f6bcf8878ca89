//! Error taxonomy for the roslink transport layer.
//!
//! Every fallible operation returns one of the typed enums below. Connection
//! lifecycle errors are surfaced to the caller; per-message errors
//! (`DecodeError`) stay inside the dispatch loop where they are counted and
//! logged.

use std::io;
use std::time::Duration;

use thiserror::Error;

// ── ConnectError ─────────────────────────────────────────────────

/// Failure to bring a transport up.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A local address or endpoint the transport needs is already taken.
    #[error("address in use: {0}")]
    AddressInUse(String),

    /// The peer actively refused the connection (or the socket path is absent).
    #[error("connection refused: {0}")]
    Refused(String),

    /// The supplied options are missing fields or structurally invalid.
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),

    /// The peer did not answer within the connect deadline.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Any other I/O failure while connecting.
    #[error("connect failed: {0}")]
    Io(#[source] io::Error),
}

impl ConnectError {
    /// Classify an I/O error raised while connecting to `target`.
    pub fn from_io(target: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Self::AddressInUse(target.to_string()),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {
                Self::Refused(format!("{target}: {err}"))
            }
            io::ErrorKind::InvalidInput => Self::InvalidOptions(format!("{target}: {err}")),
            _ => Self::Io(err),
        }
    }
}

// ── SendError ────────────────────────────────────────────────────

/// Failure to hand a command to the wire.
#[derive(Debug, Error)]
pub enum SendError {
    /// No transport is connected.
    #[error("not connected")]
    NotConnected,

    /// The peer went away while writing.
    #[error("transport broken: {0}")]
    Broken(String),

    /// The command could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<io::Error> for SendError {
    fn from(e: io::Error) -> Self {
        SendError::Broken(e.to_string())
    }
}

// ── RecvError ────────────────────────────────────────────────────

/// Outcome of a failed `receive` on a transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// No message arrived within the configured receive timeout. Non-fatal.
    #[error("receive timed out")]
    Timeout,

    /// The peer or socket closed. Terminal for the transport.
    #[error("transport closed")]
    Closed,
}

// ── Codec errors ─────────────────────────────────────────────────

/// Failure to decode an inbound frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// The bytes are not a recognised envelope.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The envelope parsed but its type is neither feedback nor state.
    #[error("unknown message kind: {0}")]
    UnknownKind(i64),
}

/// Failure to encode an outbound command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    /// A numeric field holds NaN or an infinity.
    #[error("non-finite value in field `{field}`")]
    NonFinite { field: &'static str },

    /// The serializer rejected the value.
    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl From<rmp_serde::encode::Error> for EncodeError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EncodeError::Serialize(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DecodeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

// ── StateError ───────────────────────────────────────────────────

/// A lifecycle transition was attempted from the wrong state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid state transition: {0}")]
pub struct StateError(pub &'static str);

// ── ConfigError ──────────────────────────────────────────────────

/// Failure to read or write a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}
