use thiserror::Error;

/// Errors raised by the client-side session plumbing.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The issuance endpoint answered with a non-success status.
    #[error("session issuance failed with status {status}: {message}")]
    Issuance { status: u16, message: String },
    #[error("issuance request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid relay url: {0}")]
    InvalidRelayUrl(String),
    #[error("invalid issuance endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("relay connection failed: {0}")]
    Relay(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("relay connection is closed")]
    RelayClosed,
}
