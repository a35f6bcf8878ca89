//! The connection manager.
//!
//! Owns at most one live transport (a *link*), the two telemetry channels
//! and the connection state. A link is made of:
//!
//! - the send half, shared with in-flight `send` calls behind an async mutex,
//! - a dispatch task that owns the receive half,
//! - a supervisor task that waits for dispatch and tears the link down when
//!   the peer goes away,
//! - a cancellation token observed by all of the above.
//!
//! `connect` and `disconnect` are serialised by one lock. Links carry a
//! generation number so a supervisor from an old link never touches a newer
//! one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastChannel, DEFAULT_CAPACITY, OverflowPolicy};
use crate::codec::MessageCodec;
use crate::command::Command;
use crate::dispatch::{
    DispatchExit, DispatchStats, Dispatcher, StatsSnapshot, TelemetryChannel,
};
use crate::error::{ConnectError, SendError, StateError};
use crate::state::ConnectionState;
use crate::transport::{ConnectionOptions, FrameSender, Transport, TransportSettings};

// ── ManagerSettings ──────────────────────────────────────────────

/// Construction-time settings for a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    pub transport: TransportSettings,
    /// Per-subscriber queue length on both telemetry channels.
    pub stream_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            transport: TransportSettings::default(),
            stream_capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

// ── Link ─────────────────────────────────────────────────────────

type SharedSender = Arc<tokio::sync::Mutex<Box<dyn FrameSender>>>;

struct Link {
    generation: u64,
    sender: SharedSender,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

struct Inner {
    settings: ManagerSettings,
    codec: MessageCodec,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    connect_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    feedback: TelemetryChannel,
    state: TelemetryChannel,
    stats: Arc<DispatchStats>,
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_link(&self) -> Option<Link> {
        self.link().take()
    }

    fn take_link_if(&self, generation: u64) -> Option<Link> {
        let mut slot = self.link();
        match slot.as_ref() {
            Some(link) if link.generation == generation => slot.take(),
            _ => None,
        }
    }

    fn transition(&self, f: impl FnOnce(&mut ConnectionState) -> Result<(), StateError>) {
        self.state_tx.send_modify(|state| {
            if let Err(e) = f(&mut *state) {
                warn!(error = %e, current = %state, "unexpected state transition");
            }
        });
    }

    /// Cancel, wait for the dispatch side to stop, close the send half.
    async fn retire(&self, mut link: Link) {
        link.cancel.cancel();
        if let Some(supervisor) = link.supervisor.take() {
            if let Err(e) = supervisor.await {
                warn!(generation = link.generation, error = %e, "link supervisor failed");
            }
        }
        link.sender.lock().await.close().await;
        self.transition(ConnectionState::finish_disconnect);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.link.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(link) = slot.take() {
            link.cancel.cancel();
        }
    }
}

/// Wait for the dispatch task; on peer close, tear the link down unless it
/// was already replaced or is being torn down by `connect`/`disconnect`.
async fn supervise(
    inner: Weak<Inner>,
    generation: u64,
    cancel: CancellationToken,
    dispatch: JoinHandle<DispatchExit>,
) {
    let exit = match dispatch.await {
        Ok(exit) => exit,
        Err(e) => {
            warn!(generation, error = %e, "dispatch task failed");
            DispatchExit::PeerClosed
        }
    };
    if exit == DispatchExit::Cancelled {
        return;
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let _guard = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        guard = inner.connect_lock.lock() => guard,
    };

    if let Some(mut link) = inner.take_link_if(generation) {
        info!(generation, "peer closed the connection");
        // This task is the supervisor; it must not wait on itself.
        link.supervisor = None;
        inner.retire(link).await;
    }
}

// ── ConnectionManager ────────────────────────────────────────────

/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.inner.state_tx.borrow())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_settings(ManagerSettings::default())
    }

    pub fn with_settings(settings: ManagerSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let capacity = settings.stream_capacity;
        Self {
            inner: Arc::new(Inner {
                codec: MessageCodec::new(settings.transport.max_frame_size),
                settings,
                state_tx,
                link: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                feedback: BroadcastChannel::new("feedback", capacity, settings.overflow),
                state: BroadcastChannel::new("state", capacity, settings.overflow),
                stats: Arc::new(DispatchStats::default()),
            }),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open a transport and start dispatching.
    ///
    /// An active connection is torn down first, including its dispatch
    /// task, so the old sockets are released before new ones are opened.
    pub async fn connect(&self, options: ConnectionOptions) -> Result<(), ConnectError> {
        let _guard = self.inner.connect_lock.lock().await;

        if let Some(link) = self.inner.take_link() {
            info!(generation = link.generation, "replacing active connection");
            self.inner.retire(link).await;
        }

        let kind = options.kind();
        self.inner.transition(|s| s.begin_connect(kind));
        info!(peer = %options.describe(), "connecting");

        let transport = match Transport::connect(&options, &self.inner.settings.transport).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(peer = %options.describe(), error = %e, "connect failed");
                let reason = e.to_string();
                self.inner.transition(|s| s.fail_connect(reason));
                return Err(e);
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let (sender, receiver) = transport.into_split();

        let dispatcher = Dispatcher::new(
            self.inner.codec,
            self.inner.feedback.clone(),
            self.inner.state.clone(),
            Arc::clone(&self.inner.stats),
        );
        let dispatch = tokio::spawn(dispatcher.run(receiver, cancel.clone()));
        let supervisor = tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            generation,
            cancel.clone(),
            dispatch,
        ));

        *self.inner.link() = Some(Link {
            generation,
            sender: Arc::new(tokio::sync::Mutex::new(sender)),
            cancel,
            supervisor: Some(supervisor),
        });
        self.inner.transition(ConnectionState::complete_connect);
        info!(%kind, generation, "connected");
        Ok(())
    }

    /// Like [`connect`](Self::connect), with the transport chosen by tag
    /// (`"TCP"`, `"UDS"`, `"0MQ"`) and options read from a parameter map.
    pub async fn connect_with_tag(
        &self,
        tag: &str,
        params: &serde_json::Value,
    ) -> Result<(), ConnectError> {
        let options = ConnectionOptions::from_params(tag, params)?;
        self.connect(options).await
    }

    /// Stop dispatching and release the transport. Idempotent.
    pub async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        match self.inner.take_link() {
            Some(link) => {
                let generation = link.generation;
                self.inner.retire(link).await;
                info!(generation, "disconnected");
            }
            None => debug!("disconnect: no active connection"),
        }
    }

    /// Encode and write one command.
    ///
    /// Does not wait behind other sends beyond the transport's own write
    /// lock, and returns `NotConnected` if the link is torn down mid-write.
    pub async fn send(&self, command: &Command) -> Result<(), SendError> {
        let (sender, cancel) = match self.inner.link().as_ref() {
            Some(link) => (Arc::clone(&link.sender), link.cancel.clone()),
            None => return Err(SendError::NotConnected),
        };
        let frame = self.inner.codec.encode(command)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SendError::NotConnected),
            result = async { sender.lock().await.send(frame).await } => result,
        }
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected()
    }

    /// A receiver that is notified on every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Counters accumulated across all links of this manager.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn feedback_stream(&self) -> TelemetryChannel {
        self.inner.feedback.clone()
    }

    pub fn state_stream(&self) -> TelemetryChannel {
        self.inner.state.clone()
    }
}

// ── Tests ────────────────────────────────────────────────────────
