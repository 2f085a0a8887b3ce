//! Errors for scan alerts
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanAlertError {
    #[error("HTTP request failed")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket transport error")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Invalid secure id: {0}")]
    InvalidSecureId(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Not authorized")]
    Unauthorized,

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    SubmissionFailed(String),
}
