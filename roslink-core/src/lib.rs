//! # roslink-core
//!
//! Client-side transport and messaging layer for ROS 2 robot control.
//!
//! This crate contains:
//! - **Commands**: `Command`, `TrajPoint` and the `send_*` helpers on the manager
//! - **Codec**: `MessageCodec` (MessagePack envelopes) and `FrameCodec` stream framing
//! - **Transport**: TCP, UNIX domain socket and ZeroMQ pub/sub behind one contract
//! - **Manager**: `ConnectionManager` owning the link, its state and the dispatch task
//! - **Broadcast**: bounded per-subscriber feedback and state channels
//! - **Config**: `SdkConfig` loaded from TOML
//! - **Error**: typed, `thiserror`-based errors per operation

pub mod broadcast;
pub mod codec;
pub mod command;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod message;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use broadcast::{BroadcastChannel, OverflowPolicy, Subscription, SubscriptionId};
pub use codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, FrameFormat, MessageCodec};
pub use command::{Command, JOYPAD_PUBLISHER, TrajPoint};
pub use config::SdkConfig;
pub use dispatch::{DispatchExit, DispatchStats, StatsSnapshot, TelemetryChannel};
pub use error::{
    ConfigError, ConnectError, DecodeError, EncodeError, RecvError, SendError, StateError,
};
pub use manager::{ConnectionManager, ManagerSettings};
pub use message::{Channel, InboundMessage, MessageType, Telemetry};
pub use state::ConnectionState;
pub use transport::{ConnectionOptions, Transport, TransportKind, TransportSettings};
