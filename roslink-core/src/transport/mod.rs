//! Transport abstraction over TCP, UNIX domain sockets and ZeroMQ.
//!
//! Every transport kind has a distinct send path and receive path (two TCP
//! connections, two socket paths, or a PUB/SUB socket pair), so a connected
//! [`Transport`] is a pair of independent halves:
//!
//! ```text
//!            ┌──────────────────┐  send(bytes)   ┌──────┐
//!  caller ──►│ Box<FrameSender> │ ─────────────► │      │
//!            └──────────────────┘                │ peer │
//!            ┌────────────────────┐ receive()    │      │
//!  dispatch ◄│ Box<FrameReceiver> │ ◄─────────── │      │
//!            └────────────────────┘              └──────┘
//! ```
//!
//! Halves never share a lock, so a blocked write cannot stall inbound
//! processing and vice versa. Each `receive` yields exactly one message:
//! stream transports frame with [`FrameCodec`](crate::codec::FrameCodec),
//! ZeroMQ uses its native message boundaries.

pub mod stream;
pub mod tcp;
pub mod uds;
pub mod zmq;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{DEFAULT_MAX_FRAME_SIZE, FrameFormat};
use crate::error::{ConnectError, RecvError, SendError};

// ── TransportKind ────────────────────────────────────────────────

/// The closed set of supported transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Uds,
    Zmq,
}

impl FromStr for TransportKind {
    type Err = ConnectError;

    /// Accepts `TCP`, `UDS` and `0MQ`/`ZMQ`, case-insensitively.
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDS" => Ok(Self::Uds),
            "0MQ" | "ZMQ" => Ok(Self::Zmq),
            _ => Err(ConnectError::InvalidOptions(format!(
                "unsupported transport `{tag}`; use TCP, UDS or 0MQ"
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Uds => write!(f, "UDS"),
            Self::Zmq => write!(f, "0MQ"),
        }
    }
}

// ── ConnectionOptions ────────────────────────────────────────────

/// Where to connect. The receive endpoint here must match the peer's send
/// endpoint and vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOptions {
    Tcp {
        ip: String,
        send_port: u16,
        recv_port: u16,
    },
    Uds {
        send_path: String,
        recv_path: String,
    },
    Zmq {
        send_endpoint: String,
        recv_endpoint: String,
    },
}

impl ConnectionOptions {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp { .. } => TransportKind::Tcp,
            Self::Uds { .. } => TransportKind::Uds,
            Self::Zmq { .. } => TransportKind::Zmq,
        }
    }

    /// Structural validation; nothing here touches the network.
    pub fn validate(&self) -> Result<(), ConnectError> {
        let invalid = |msg: String| Err(ConnectError::InvalidOptions(msg));

        match self {
            Self::Tcp {
                ip,
                send_port,
                recv_port,
            } => {
                if ip.trim().is_empty() || ip.chars().any(char::is_whitespace) {
                    return invalid(format!("invalid ip `{ip}`"));
                }
                if *send_port == 0 || *recv_port == 0 {
                    return invalid("ports must be non-zero".into());
                }
                Ok(())
            }
            Self::Uds {
                send_path,
                recv_path,
            } => {
                if send_path.is_empty() || recv_path.is_empty() {
                    return invalid("socket paths must not be empty".into());
                }
                Ok(())
            }
            Self::Zmq {
                send_endpoint,
                recv_endpoint,
            } => {
                zmq::parse_endpoint(send_endpoint)?;
                zmq::parse_endpoint(recv_endpoint)?;
                Ok(())
            }
        }
    }

    /// Build options from a transport tag and a loose parameter map such as
    /// `{"ip": "127.0.0.1", "send_port": 5000, "recv_port": 5001}`.
    ///
    /// Ports may be integers or numeric strings. Missing or mistyped fields
    /// are `InvalidOptions`.
    pub fn from_params(tag: &str, params: &serde_json::Value) -> Result<Self, ConnectError> {
        let kind: TransportKind = tag.parse()?;
        let params = params.as_object().ok_or_else(|| {
            ConnectError::InvalidOptions(format!("{kind} parameters must be a map"))
        })?;

        let text = |key: &str| -> Result<String, ConnectError> {
            params
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ConnectError::InvalidOptions(format!("{kind} requires `{key}`")))
        };
        let port = |key: &str| -> Result<u16, ConnectError> {
            let value = params.get(key);
            value
                .and_then(serde_json::Value::as_u64)
                .or_else(|| value.and_then(|v| v.as_str()?.parse().ok()))
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| {
                    ConnectError::InvalidOptions(format!("{kind} requires a valid `{key}`"))
                })
        };

        let options = match kind {
            TransportKind::Tcp => Self::Tcp {
                ip: text("ip")?,
                send_port: port("send_port")?,
                recv_port: port("recv_port")?,
            },
            TransportKind::Uds => Self::Uds {
                send_path: text("send_path")?,
                recv_path: text("recv_path")?,
            },
            TransportKind::Zmq => Self::Zmq {
                send_endpoint: text("send_endpoint")?,
                recv_endpoint: text("recv_endpoint")?,
            },
        };
        options.validate()?;
        Ok(options)
    }

    /// Human-readable `send / recv` description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Tcp {
                ip,
                send_port,
                recv_port,
            } => format!("tcp {ip} send:{send_port} recv:{recv_port}"),
            Self::Uds {
                send_path,
                recv_path,
            } => format!("uds send:{send_path} recv:{recv_path}"),
            Self::Zmq {
                send_endpoint,
                recv_endpoint,
            } => format!("0mq send:{send_endpoint} recv:{recv_endpoint}"),
        }
    }
}

// ── TransportSettings ────────────────────────────────────────────

/// Tunables shared by all transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Framing used by stream transports (ignored by ZeroMQ).
    pub frame_format: FrameFormat,
    /// Upper bound for a single message in either direction.
    pub max_frame_size: usize,
    /// Deadline for establishing each socket.
    pub connect_timeout: Duration,
    /// When set, `receive` fails with [`RecvError::Timeout`] after this long.
    pub recv_timeout: Option<Duration>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            frame_format: FrameFormat::MsgPack,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(5),
            recv_timeout: None,
        }
    }
}

// ── Halves ───────────────────────────────────────────────────────

/// The outbound half of a transport.
#[async_trait]
pub trait FrameSender: Send {
    /// Write one complete message. Partial writes are retried internally.
    async fn send(&mut self, frame: Bytes) -> Result<(), SendError>;

    /// Release the send socket. Idempotent.
    async fn close(&mut self);
}

/// The inbound half of a transport.
#[async_trait]
pub trait FrameReceiver: Send {
    /// Wait for exactly one complete message.
    async fn receive(&mut self) -> Result<Bytes, RecvError>;

    /// Release the receive socket. Idempotent.
    async fn close(&mut self);
}

/// Apply the optional receive timeout to a pending receive.
pub(crate) async fn recv_within<F: Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, RecvError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RecvError::Timeout),
        None => Ok(fut.await),
    }
}

/// Bound a connect attempt by `limit`.
pub(crate) async fn connect_within<F, T>(limit: Duration, fut: F) -> Result<T, ConnectError>
where
    F: Future<Output = Result<T, ConnectError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ConnectError::Timeout(limit))?
}

// ── Transport ────────────────────────────────────────────────────

/// A connected transport: one send path and one receive path.
pub struct Transport {
    kind: TransportKind,
    sender: Box<dyn FrameSender>,
    receiver: Box<dyn FrameReceiver>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("kind", &self.kind).finish()
    }
}

impl Transport {
    pub fn new(
        kind: TransportKind,
        sender: Box<dyn FrameSender>,
        receiver: Box<dyn FrameReceiver>,
    ) -> Self {
        Self {
            kind,
            sender,
            receiver,
        }
    }

    /// Validate `options` and bring up both paths.
    ///
    /// If the second path fails, the first is closed before returning.
    pub async fn connect(
        options: &ConnectionOptions,
        settings: &TransportSettings,
    ) -> Result<Self, ConnectError> {
        options.validate()?;
        match options {
            ConnectionOptions::Tcp {
                ip,
                send_port,
                recv_port,
            } => tcp::connect(ip, *send_port, *recv_port, settings).await,
            ConnectionOptions::Uds {
                send_path,
                recv_path,
            } => uds::connect(send_path, recv_path, settings).await,
            ConnectionOptions::Zmq {
                send_endpoint,
                recv_endpoint,
            } => zmq::connect(send_endpoint, recv_endpoint, settings).await,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub async fn send(&mut self, frame: Bytes) -> Result<(), SendError> {
        self.sender.send(frame).await
    }

    pub async fn receive(&mut self) -> Result<Bytes, RecvError> {
        self.receiver.receive().await
    }

    /// Close both paths. Idempotent.
    pub async fn disconnect(&mut self) {
        self.sender.close().await;
        self.receiver.close().await;
    }

    /// Separate the halves so they can live on different tasks.
    pub fn into_split(self) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
        (self.sender, self.receiver)
    }
}
