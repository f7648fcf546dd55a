/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed, either locally or by the remote end.
    #[error("transport closed")]
    Closed,

    /// Opening an outbound connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Binding a listening socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer stopped draining its outbound queue; the transport was
    /// closed.
    #[error("send queue full ({capacity} chunks), transport closed")]
    QueueFull { capacity: usize },

    /// Writing to the underlying stream failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading from the underlying stream failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}

