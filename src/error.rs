use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed '{event}' event: {reason}")]
    MalformedEvent { event: String, reason: String },
    #[error("hub connection is not established")]
    HubNotConnected,
    #[error("hub handshake failed: {0}")]
    HubHandshake(String),
    #[error("hub invocation '{method}' failed: {message}")]
    HubInvocation { method: String, message: String },
    #[error("hub connection closed: {0}")]
    HubClosed(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn malformed(event: &str, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
