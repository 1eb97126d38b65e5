/// Errors returned by [`connect`](crate::XmlStreamClient::connect).
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Resolution, refusal, timeout or unreachable peer.
    #[error("transport error: {0}")]
    Transport(#[from] xmlstream_transport::TransportError),

    /// The stream reader thread could not be started.
    #[error("failed to start stream reader: {0}")]
    Spawn(std::io::Error),

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

/// Errors returned by [`send`](crate::XmlStreamClient::send).
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No live connection.
    #[error("not connected")]
    NotConnected,

    /// Encoding or writing failed (including a send racing a disconnect).
    #[error("send failed: {0}")]
    Frame(#[from] xmlstream_frame::XmlError),
}

/// Errors constructing a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A background thread could not be started.
    #[error("failed to start client thread: {0}")]
    Spawn(#[from] std::io::Error),
}
