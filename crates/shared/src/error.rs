use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BackendUnavailable,
    SendFailed,
    LocationUnavailable,
}

/// Failures surfaced by the chat core.
///
/// Collaborator failures are carried verbatim in `message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },
    #[error("send failed: {message}")]
    SendFailed { message: String },
    #[error("location unavailable: {message}")]
    LocationUnavailable { message: String },
}

impl ChatError {
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    pub fn location_unavailable(message: impl Into<String>) -> Self {
        Self::LocationUnavailable {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            Self::SendFailed { .. } => ErrorCode::SendFailed,
            Self::LocationUnavailable { .. } => ErrorCode::LocationUnavailable,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BackendUnavailable { message }
            | Self::SendFailed { message }
            | Self::LocationUnavailable { message } => message,
        }
    }
}

/// Serializable form of a [`ChatError`], for front-ends that print JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ChatError> for ApiError {
    fn from(value: &ChatError) -> Self {
        Self {
            code: value.code(),
            message: value.message().to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(value: ChatError) -> Self {
        Self::from(&value)
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
