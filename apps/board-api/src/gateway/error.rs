use teamboard_common::protocol::ErrorPayload;
use thiserror::Error;

/// A failed client event. Each one is reported to the originating connection
/// as a single `error` event and never reaches other connections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Not authorized for the room or action. The text never says whether the
    /// target exists.
    #[error("Access denied")]
    AccessDenied,
    #[error("{0}")]
    Validation(String),
    /// The data layer refused or failed; nothing was broadcast.
    #[error("{0}")]
    Persistence(&'static str),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn payload(&self, event: Option<&str>) -> ErrorPayload {
        ErrorPayload {
            message: self.to_string(),
            event: event.map(str::to_string),
        }
    }
}
