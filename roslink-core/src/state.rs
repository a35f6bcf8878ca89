//! Connection lifecycle owned by the [`ConnectionManager`](crate::ConnectionManager).
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::StateError;
use crate::transport::TransportKind;

// ── ConnectionState ──────────────────────────────────────────────

/// Where the manager is in its connect/disconnect cycle.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲  ▲            │              │
///       │  │            ▼              │
///       │  └──────── Failed            │
///       └──────────────────────────────┘
/// ```
///
/// `Failed` behaves like `Disconnected` for retry purposes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport. Initial state.
    #[default]
    Disconnected,

    /// Sockets are being opened.
    Connecting { kind: TransportKind },

    /// Transport up and the dispatch loop running.
    Connected {
        kind: TransportKind,
        /// When the state was entered.
        since: Instant,
    },

    /// The last connect attempt failed.
    Failed { reason: String },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting { kind } => write!(f, "Connecting ({kind})"),
            Self::Connected { kind, .. } => write!(f, "Connected ({kind})"),
            Self::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// `true` for `Disconnected` and `Failed`.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed { .. })
    }

    /// The transport in use while connecting or connected.
    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            Self::Connecting { kind } | Self::Connected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// How long the state has been `Connected`.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`, `Failed`.
    pub fn begin_connect(&mut self, kind: TransportKind) -> Result<(), StateError> {
        if !self.is_idle() {
            return Err(StateError("cannot connect: a connection is active"));
        }
        *self = Self::Connecting { kind };
        Ok(())
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), StateError> {
        match self {
            Self::Connecting { kind } => {
                *self = Self::Connected {
                    kind: *kind,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(StateError("cannot complete connect: not Connecting")),
        }
    }

    /// Valid from: `Connecting`.
    pub fn fail_connect(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        match self {
            Self::Connecting { .. } => {
                *self = Self::Failed {
                    reason: reason.into(),
                };
                Ok(())
            }
            _ => Err(StateError("cannot fail connect: not Connecting")),
        }
    }

    /// Valid from: `Connected`.
    pub fn finish_disconnect(&mut self) -> Result<(), StateError> {
        match self {
            Self::Connected { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(StateError("cannot disconnect: not Connected")),
        }
    }

    /// Reset to `Disconnected` regardless of the current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
