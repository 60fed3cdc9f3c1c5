use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The underlying transport could not be established. Fatal at
    /// initialization; never retried.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("transport channel closed")]
    ChannelClosed,

    #[error("invalid wire message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    /// An error reported by the remote end of the channel.
    #[error("remote error: {0}")]
    Remote(String),

    /// A backend-side failure while handling a call.
    #[error("{0}")]
    Backend(String),
}
