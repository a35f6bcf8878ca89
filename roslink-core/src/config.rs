//! TOML configuration for SDK clients.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::{DEFAULT_CAPACITY, OverflowPolicy};
use crate::codec::{DEFAULT_MAX_FRAME_SIZE, FrameFormat};
use crate::error::{ConfigError, ConnectError};
use crate::manager::ManagerSettings;
use crate::transport::{ConnectionOptions, TransportKind, TransportSettings};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub connection: ConnectionConfig,
    pub transport: TransportConfig,
    pub streams: StreamConfig,
    pub logging: LoggingConfig,
}

/// Where to connect. Only the fields for the selected `kind` are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport tag: "TCP", "UDS" or "0MQ".
    pub kind: String,
    pub ip: String,
    pub send_port: u16,
    pub recv_port: u16,
    pub send_path: String,
    pub recv_path: String,
    pub send_endpoint: String,
    pub recv_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Stream framing: "msgpack" or "length_prefixed".
    pub framing: FrameFormat,
    pub max_frame_size: usize,
    pub connect_timeout_ms: u64,
    /// 0 disables the receive timeout.
    pub recv_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-subscriber queue length.
    pub capacity: usize,
    /// "drop_oldest" or "drop_newest".
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: "TCP".into(),
            ip: "127.0.0.1".into(),
            send_port: 5000,
            recv_port: 5001,
            send_path: "/tmp/roslink_send.sock".into(),
            recv_path: "/tmp/roslink_recv.sock".into(),
            send_endpoint: "tcp://127.0.0.1:5555".into(),
            recv_endpoint: "tcp://127.0.0.1:5556".into(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            framing: FrameFormat::MsgPack,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout_ms: 5000,
            recv_timeout_ms: 0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SdkConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(_)) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration, reporting any I/O or parse error.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// The default configuration as TOML text.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, Self::default_toml()?)?;
        Ok(())
    }

    pub fn transport_settings(&self) -> TransportSettings {
        let t = &self.transport;
        TransportSettings {
            frame_format: t.framing,
            max_frame_size: t.max_frame_size.max(1),
            connect_timeout: Duration::from_millis(t.connect_timeout_ms.max(1)),
            recv_timeout: (t.recv_timeout_ms > 0).then(|| Duration::from_millis(t.recv_timeout_ms)),
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            transport: self.transport_settings(),
            stream_capacity: self.streams.capacity,
            overflow: self.streams.overflow,
        }
    }
}

impl ConnectionConfig {
    /// Select the fields for `kind` and validate them.
    pub fn to_options(&self) -> Result<ConnectionOptions, ConnectError> {
        let options = match self.kind.parse::<TransportKind>()? {
            TransportKind::Tcp => ConnectionOptions::Tcp {
                ip: self.ip.clone(),
                send_port: self.send_port,
                recv_port: self.recv_port,
            },
            TransportKind::Uds => ConnectionOptions::Uds {
                send_path: self.send_path.clone(),
                recv_path: self.recv_path.clone(),
            },
            TransportKind::Zmq => ConnectionOptions::Zmq {
                send_endpoint: self.send_endpoint.clone(),
                recv_endpoint: self.recv_endpoint.clone(),
            },
        };
        options.validate()?;
        Ok(options)
    }
}

// ── Tests ────────────────────────────────────────────────────────
