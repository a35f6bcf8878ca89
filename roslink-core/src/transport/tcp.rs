//! TCP transport: one outbound connection per direction.

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ConnectError;
use crate::transport::stream::{StreamReceiver, StreamSender};
use crate::transport::{Transport, TransportKind, TransportSettings, connect_within};

/// Connect `ip:send_port` for commands and `ip:recv_port` for telemetry.
pub async fn connect(
    ip: &str,
    send_port: u16,
    recv_port: u16,
    settings: &TransportSettings,
) -> Result<Transport, ConnectError> {
    let send_target = format!("{ip}:{send_port}");
    let recv_target = format!("{ip}:{recv_port}");

    let send_stream = open(ip, send_port, &send_target, settings).await?;
    // On failure `send_stream` is dropped here, closing the first connection.
    let recv_stream = open(ip, recv_port, &recv_target, settings).await?;

    debug!(send = %send_target, recv = %recv_target, "tcp transport connected");

    Ok(Transport::new(
        TransportKind::Tcp,
        Box::new(StreamSender::new(send_stream, send_target, settings)),
        Box::new(StreamReceiver::new(recv_stream, recv_target, settings)),
    ))
}

async fn open(
    ip: &str,
    port: u16,
    target: &str,
    settings: &TransportSettings,
) -> Result<TcpStream, ConnectError> {
    let stream = connect_within(settings.connect_timeout, async {
        TcpStream::connect((ip, port))
            .await
            .map_err(|e| ConnectError::from_io(target, e))
    })
    .await?;
    stream.set_nodelay(true).map_err(ConnectError::Io)?;
    Ok(stream)
}
