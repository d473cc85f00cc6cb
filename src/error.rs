use thiserror::Error;

#[derive(Error, Debug)]
pub enum PantheonError {
    #[error("WebSocket connection error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    TlsError(#[from] rustls::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Connection refused by {url}")]
    ConnectionRefused { url: String },

    #[error("No heartbeat reply within {secs}s")]
    HeartbeatTimeout { secs: u64 },

    #[error("No access token available")]
    NotAuthenticated,

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Metrics server error: {0}")]
    MetricsError(String),
}

pub type Result<T> = std::result::Result<T, PantheonError>;
