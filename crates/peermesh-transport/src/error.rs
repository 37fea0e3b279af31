/// Errors that can occur in the transport layer.
///
/// Covers both the relay link (WebSocket) and the point-to-point peer
/// channels.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Dialing a remote endpoint failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// A peer channel was asked to send before negotiation finished.
    #[error("channel not connected")]
    NotConnected,

    /// The negotiation step refused a signaling payload.
    #[error("signal rejected: {0}")]
    SignalRejected(String),

    /// The channel options can't be honored by this transport.
    #[error("unsupported channel options: {0}")]
    Unsupported(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
