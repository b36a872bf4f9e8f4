use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no gateway endpoint configured")]
    NotConfigured,
    #[error("invalid gateway endpoint {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed gateway message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("gateway client is shut down")]
    Closed,
}

pub type GatewayResult<T> = Result<T, GatewayError>;
