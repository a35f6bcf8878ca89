//! ZeroMQ pub/sub transport.
//!
//! Commands go out through a PUB socket connected to `send_endpoint`;
//! telemetry arrives on a SUB socket connected to `recv_endpoint` and
//! subscribed to every topic. ZeroMQ preserves message boundaries, so no
//! extra framing is applied. For multipart messages the last part is the
//! payload (leading parts are topics).
//!
//! The sockets never report that a peer went away, so a watcher task
//! checks that both peer endpoints still accept connections. Once either
//! refuses, `receive` returns `Closed` and `send` returns `Broken`.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use zeromq::{
    Endpoint, PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqError, ZmqMessage,
};

use crate::error::{ConnectError, RecvError, SendError};
use crate::transport::{
    FrameReceiver, FrameSender, Transport, TransportKind, TransportSettings, connect_within,
    recv_within,
};

/// Check that `endpoint` is a well-formed ZeroMQ endpoint (`tcp://…`, `ipc://…`).
pub fn parse_endpoint(endpoint: &str) -> Result<Endpoint, ConnectError> {
    endpoint
        .parse::<Endpoint>()
        .map_err(|e| ConnectError::InvalidOptions(format!("endpoint `{endpoint}`: {e}")))
}

/// Period between peer liveness checks.
pub const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

fn connect_error(endpoint: &str, err: ZmqError) -> ConnectError {
    match err {
        ZmqError::Network(io) => ConnectError::from_io(endpoint, io),
        other => ConnectError::Refused(format!("{endpoint}: {other}")),
    }
}

/// Bring up the PUB/SUB pair.
pub async fn connect(
    send_endpoint: &str,
    recv_endpoint: &str,
    settings: &TransportSettings,
) -> Result<Transport, ConnectError> {
    let watched = [parse_endpoint(send_endpoint)?, parse_endpoint(recv_endpoint)?];

    let mut publisher = PubSocket::new();
    connect_within(settings.connect_timeout, async {
        publisher
            .connect(send_endpoint)
            .await
            .map_err(|e| connect_error(send_endpoint, e))
    })
    .await?;

    let mut subscriber = SubSocket::new();
    let subscribed = connect_within(settings.connect_timeout, async {
        subscriber
            .connect(recv_endpoint)
            .await
            .map_err(|e| connect_error(recv_endpoint, e))?;
        subscriber
            .subscribe("")
            .await
            .map_err(|e| connect_error(recv_endpoint, e))
    })
    .await;

    if let Err(e) = subscribed {
        publisher.close().await;
        return Err(e);
    }

    debug!(send = %send_endpoint, recv = %recv_endpoint, "0mq transport connected");

    let peer_gone = CancellationToken::new();
    let stop = CancellationToken::new();
    tokio::spawn(watch_peer(watched, peer_gone.clone(), stop.clone()));

    Ok(Transport::new(
        TransportKind::Zmq,
        Box::new(ZmqSender {
            socket: Some(publisher),
            endpoint: send_endpoint.to_string(),
            max_frame_size: settings.max_frame_size,
            peer_gone: peer_gone.clone(),
        }),
        Box::new(ZmqReceiver {
            socket: Some(subscriber),
            endpoint: recv_endpoint.to_string(),
            recv_timeout: settings.recv_timeout,
            max_frame_size: settings.max_frame_size,
            peer_gone,
            watch: Some(stop.drop_guard()),
        }),
    ))
}

// ── Peer liveness ────────────────────────────────────────────────

/// Whether something still listens at `endpoint`. Only a definite refusal
/// counts as gone; slow or unusual failures are treated as alive.
pub async fn peer_listening(endpoint: &Endpoint) -> bool {
    let attempt = async {
        match endpoint {
            Endpoint::Tcp(host, port) => {
                let host = host.to_string();
                TcpStream::connect((host.as_str(), *port)).await.map(drop)
            }
            #[cfg(unix)]
            Endpoint::Ipc(Some(path)) => tokio::net::UnixStream::connect(path).await.map(drop),
            _ => Ok(()),
        }
    };

    match tokio::time::timeout(LIVENESS_INTERVAL, attempt).await {
        Ok(Err(e)) => !matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound),
        _ => true,
    }
}

/// Cancel `peer_gone` as soon as one of `endpoints` stops listening.
/// Runs until then or until `stop` is cancelled.
async fn watch_peer(
    endpoints: [Endpoint; 2],
    peer_gone: CancellationToken,
    stop: CancellationToken,
) {
    let mut ticks = tokio::time::interval(LIVENESS_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticks.tick() => {}
        }
        for endpoint in &endpoints {
            if !peer_listening(endpoint).await {
                debug!(endpoint = %endpoint, "0mq peer stopped listening");
                peer_gone.cancel();
                return;
            }
        }
    }
}

// ── ZmqSender ────────────────────────────────────────────────────

pub struct ZmqSender {
    socket: Option<PubSocket>,
    endpoint: String,
    max_frame_size: usize,
    peer_gone: CancellationToken,
}

#[async_trait]
impl FrameSender for ZmqSender {
    async fn send(&mut self, frame: Bytes) -> Result<(), SendError> {
        if frame.len() > self.max_frame_size {
            return Err(SendError::Broken(format!(
                "frame of {} bytes exceeds {}",
                frame.len(),
                self.max_frame_size
            )));
        }
        let socket = self.socket.as_mut().ok_or(SendError::NotConnected)?;
        if self.peer_gone.is_cancelled() {
            return Err(SendError::Broken(format!("{}: peer went away", self.endpoint)));
        }
        socket
            .send(ZmqMessage::from(frame))
            .await
            .map_err(|e| SendError::Broken(format!("{}: {e}", self.endpoint)))
    }

    async fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            for e in socket.close().await {
                debug!(endpoint = %self.endpoint, error = %e, "pub socket close");
            }
        }
    }
}

// ── ZmqReceiver ──────────────────────────────────────────────────

pub struct ZmqReceiver {
    socket: Option<SubSocket>,
    endpoint: String,
    recv_timeout: Option<Duration>,
    max_frame_size: usize,
    peer_gone: CancellationToken,
    /// Stops the liveness watcher when the receive half goes away.
    watch: Option<DropGuard>,
}

#[async_trait]
impl FrameReceiver for ZmqReceiver {
    async fn receive(&mut self) -> Result<Bytes, RecvError> {
        let socket = self.socket.as_mut().ok_or(RecvError::Closed)?;
        let peer_gone = &self.peer_gone;

        let received = recv_within(self.recv_timeout, async {
            tokio::select! {
                message = socket.recv() => Some(message),
                _ = peer_gone.cancelled() => None,
            }
        })
        .await?;

        match received {
            None => {
                debug!(endpoint = %self.endpoint, "0mq peer went away");
                self.close().await;
                Err(RecvError::Closed)
            }
            Some(Ok(message)) => {
                let frame = message.into_vec().pop().unwrap_or_default();
                if frame.len() > self.max_frame_size {
                    // Oversized messages are handed on truncated to nothing;
                    // the codec reports them as malformed.
                    warn!(
                        endpoint = %self.endpoint,
                        bytes = frame.len(),
                        "oversized 0mq message"
                    );
                    return Ok(Bytes::new());
                }
                Ok(frame)
            }
            Some(Err(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "sub socket failed");
                self.close().await;
                Err(RecvError::Closed)
            }
        }
    }

    async fn close(&mut self) {
        self.watch.take();
        if let Some(socket) = self.socket.take() {
            for e in socket.close().await {
                debug!(endpoint = %self.endpoint, error = %e, "sub socket close");
            }
        }
    }
}
