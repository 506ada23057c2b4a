use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with its structured error body.
    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("websocket error: {0}")]
    Socket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("no project entered")]
    NoProject,

    #[error("task {0} is not on the board")]
    UnknownTask(String),
}

impl ClientError {
    /// Whether the server refused the action rather than failing to answer.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if (400..500).contains(status))
    }
}
