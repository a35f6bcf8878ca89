//! Framed halves over any async byte stream.
//!
//! TCP and UNIX sockets share this implementation; they only differ in how
//! the underlying streams are opened.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::codec::FrameCodec;
use crate::error::{RecvError, SendError};
use crate::transport::{FrameReceiver, FrameSender, TransportSettings, recv_within};

// ── StreamSender ─────────────────────────────────────────────────

/// Writes framed messages to a byte stream.
pub struct StreamSender<W> {
    sink: Option<FramedWrite<W, FrameCodec>>,
    peer: String,
}

impl<W: AsyncWrite + Unpin + Send> StreamSender<W> {
    pub fn new(writer: W, peer: impl Into<String>, settings: &TransportSettings) -> Self {
        let codec = FrameCodec::new(settings.frame_format, settings.max_frame_size);
        Self {
            sink: Some(FramedWrite::new(writer, codec)),
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSender for StreamSender<W> {
    async fn send(&mut self, frame: Bytes) -> Result<(), SendError> {
        let sink = self.sink.as_mut().ok_or(SendError::NotConnected)?;
        // `send` flushes, so the frame is fully written or the call fails.
        sink.send(frame)
            .await
            .map_err(|e| SendError::Broken(format!("{}: {e}", self.peer)))
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(peer = %self.peer, error = %e, "send path shutdown failed");
            }
        }
    }
}

// ── StreamReceiver ───────────────────────────────────────────────

/// Reads framed messages from a byte stream.
pub struct StreamReceiver<R> {
    stream: Option<FramedRead<R, FrameCodec>>,
    peer: String,
    recv_timeout: Option<std::time::Duration>,
}

impl<R: AsyncRead + Unpin + Send> StreamReceiver<R> {
    pub fn new(reader: R, peer: impl Into<String>, settings: &TransportSettings) -> Self {
        let codec = FrameCodec::new(settings.frame_format, settings.max_frame_size);
        Self {
            stream: Some(FramedRead::new(reader, codec)),
            peer: peer.into(),
            recv_timeout: settings.recv_timeout,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameReceiver for StreamReceiver<R> {
    async fn receive(&mut self) -> Result<Bytes, RecvError> {
        let stream = self.stream.as_mut().ok_or(RecvError::Closed)?;

        match recv_within(self.recv_timeout, stream.next()).await? {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => {
                // A byte stream cannot resynchronise after a framing error.
                warn!(peer = %self.peer, error = %e, "receive path failed");
                self.stream = None;
                Err(RecvError::Closed)
            }
            None => {
                debug!(peer = %self.peer, "peer closed receive path");
                self.stream = None;
                Err(RecvError::Closed)
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameFormat;

    fn settings(format: FrameFormat) -> TransportSettings {
        TransportSettings {
            frame_format: format,
            ..TransportSettings::default()
        }
    }

    #[tokio::test]
    async fn receives_frames_then_closed() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x01, 0x02]);
        let mock = tokio_test::io::Builder::new().read(&stream).build();

        let mut rx = StreamReceiver::new(mock, "mock", &settings(FrameFormat::MsgPack));
        assert_eq!(rx.receive().await.unwrap(), &[0x01u8][..]);
        assert_eq!(rx.receive().await.unwrap(), &[0x02u8][..]);
        assert_eq!(rx.receive().await, Err(RecvError::Closed));
        // Stays closed.
        assert_eq!(rx.receive().await, Err(RecvError::Closed));
    }

    #[tokio::test]
    async fn truncated_frame_at_eof_is_closed() {
        let mock = tokio_test::io::Builder::new().read(&[0x92, 0x01]).build();
        let mut rx = StreamReceiver::new(mock, "mock", &settings(FrameFormat::MsgPack));
        assert_eq!(rx.receive().await, Err(RecvError::Closed));
    }

    #[tokio::test]
    async fn sender_writes_length_prefix() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, b'a', b'b', b'c'])
            .build();
        let mut tx = StreamSender::new(mock, "mock", &settings(FrameFormat::LengthPrefixed));
        tx.send(Bytes::from_static(b"abc")).await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_is_not_connected() {
        let mock = tokio_test::io::Builder::new().build();
        let mut tx = StreamSender::new(mock, "mock", &settings(FrameFormat::MsgPack));
        tx.close().await;
        tx.close().await;
        assert!(matches!(
            tx.send(Bytes::from_static(b"\x01")).await,
            Err(SendError::NotConnected)
        ));
    }
}
