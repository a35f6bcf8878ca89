//! Background receive loop.
//!
//! One dispatch task runs per connected transport. It pulls frames from the
//! receive half, decodes them and publishes each message to the feedback or
//! state channel. Bad frames are counted and skipped; only a closed transport
//! or cancellation ends the loop. The loop never touches connection state:
//! it reports how it ended and the manager decides what that means.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::broadcast::BroadcastChannel;
use crate::codec::MessageCodec;
use crate::error::{DecodeError, RecvError};
use crate::message::InboundMessage;
use crate::transport::FrameReceiver;

/// A publish point carrying decoded inbound messages.
pub type TelemetryChannel = BroadcastChannel<Arc<InboundMessage>>;

// ── DispatchStats ────────────────────────────────────────────────

/// Live counters updated by the dispatch loop.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    feedback: AtomicU64,
    state: AtomicU64,
    malformed: AtomicU64,
    unknown_kind: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub feedback: u64,
    pub state: u64,
    pub malformed: u64,
    pub unknown_kind: u64,
    pub timeouts: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            feedback: self.feedback.load(Ordering::Relaxed),
            state: self.state.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_kind: self.unknown_kind.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Why the dispatch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The transport reported `Closed`.
    PeerClosed,
    /// The link's cancellation token fired.
    Cancelled,
}

/// Everything the loop needs besides the receive half.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    codec: MessageCodec,
    feedback: TelemetryChannel,
    state: TelemetryChannel,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        codec: MessageCodec,
        feedback: TelemetryChannel,
        state: TelemetryChannel,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            codec,
            feedback,
            state,
            stats,
        }
    }

    /// Receive until the transport closes or `cancel` fires.
    ///
    /// The receive half is closed before returning, so its socket is
    /// released once this future completes.
    pub async fn run(
        self,
        mut receiver: Box<dyn FrameReceiver>,
        cancel: CancellationToken,
    ) -> DispatchExit {
        let exit = loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = receiver.receive() => Some(r),
            };

            match received {
                None => break DispatchExit::Cancelled,
                Some(Ok(frame)) => {
                    DispatchStats::bump(&self.stats.received);
                    self.route(&frame);
                }
                Some(Err(RecvError::Timeout)) => {
                    DispatchStats::bump(&self.stats.timeouts);
                    trace!("receive timeout");
                }
                Some(Err(RecvError::Closed)) => break DispatchExit::PeerClosed,
            }
        };

        receiver.close().await;
        debug!(?exit, "dispatch loop finished");
        exit
    }

    /// Decode one frame and publish it.
    pub fn route(&self, frame: &[u8]) {
        match self.codec.decode(frame) {
            Ok(message) => {
                let (channel, counter) = match &message {
                    InboundMessage::Feedback(_) => (&self.feedback, &self.stats.feedback),
                    InboundMessage::State(_) => (&self.state, &self.stats.state),
                };
                DispatchStats::bump(counter);
                let delivered = channel.publish(Arc::new(message));
                trace!(channel = channel.name(), delivered, "message published");
            }
            Err(DecodeError::UnknownKind(kind)) => {
                DispatchStats::bump(&self.stats.unknown_kind);
                warn!(kind, "dropping message of unknown kind");
            }
            Err(e @ DecodeError::Malformed(_)) => {
                DispatchStats::bump(&self.stats.malformed);
                warn!(error = %e, bytes = frame.len(), "dropping malformed message");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
