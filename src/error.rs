use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::Deserialize;

/// Errors returned by every client operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No response was received (connect failure, timeout, broken body stream).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("API error {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        body: Option<ErrorBody>,
    },

    /// The refresh token was rejected; the session has been torn down.
    #[error("session expired")]
    SessionExpired,

    #[error("invalid response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of an [`Error`], for mapping to user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    Network,
    Timeout,
    Unauthenticated,
    Forbidden,
    NotFound,
    Validation,
    Server,
    SessionExpired,
    Other,
}

/// Error document the backend sends alongside non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ErrorBody {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Field-level validation messages.
    #[serde(default)]
    pub errors: Option<BTreeMap<String, String>>,
}

impl Error {
    /// Builds an [`Error::Api`] from a failed response's status and raw body.
    pub(crate) fn from_status(status: StatusCode, raw: &[u8]) -> Self {
        let body = serde_json::from_slice::<ErrorBody>(raw).ok();
        let message = body
            .as_ref()
            .and_then(|b| b.message.clone())
            .or_else(|| {
                let text = String::from_utf8_lossy(raw).trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status").to_string());
        Self::Api {
            status,
            message,
            body,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(e) if e.is_timeout() => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::Api { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => ErrorKind::Unauthenticated,
                StatusCode::FORBIDDEN => ErrorKind::Forbidden,
                StatusCode::NOT_FOUND => ErrorKind::NotFound,
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Validation,
                s if s.is_server_error() => ErrorKind::Server,
                _ => ErrorKind::Other,
            },
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::Decode(_) | Self::Encode(_) | Self::Config(_) => ErrorKind::Other,
        }
    }

    /// HTTP status of an [`Error::Api`], `None` for every other variant.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Network(e) if e.is_timeout())
    }
}
