//! UNIX domain socket transport: one stream socket per direction.

use crate::error::ConnectError;
use crate::transport::{Transport, TransportSettings};

/// Connect `send_path` for commands and `recv_path` for telemetry.
#[cfg(unix)]
pub async fn connect(
    send_path: &str,
    recv_path: &str,
    settings: &TransportSettings,
) -> Result<Transport, ConnectError> {
    use tokio::net::UnixStream;
    use tracing::debug;

    use crate::transport::stream::{StreamReceiver, StreamSender};
    use crate::transport::{TransportKind, connect_within};

    async fn open(path: &str, settings: &TransportSettings) -> Result<UnixStream, ConnectError> {
        connect_within(settings.connect_timeout, async {
            UnixStream::connect(path)
                .await
                .map_err(|e| ConnectError::from_io(path, e))
        })
        .await
    }

    let send_stream = open(send_path, settings).await?;
    let recv_stream = open(recv_path, settings).await?;

    debug!(send = %send_path, recv = %recv_path, "uds transport connected");

    Ok(Transport::new(
        TransportKind::Uds,
        Box::new(StreamSender::new(send_stream, send_path, settings)),
        Box::new(StreamReceiver::new(recv_stream, recv_path, settings)),
    ))
}

#[cfg(not(unix))]
pub async fn connect(
    send_path: &str,
    _recv_path: &str,
    _settings: &TransportSettings,
) -> Result<Transport, ConnectError> {
    Err(ConnectError::InvalidOptions(format!(
        "unix sockets are not supported on this platform ({send_path})"
    )))
}
