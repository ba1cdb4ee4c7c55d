//! Wire error types.

use thiserror::Error;

/// How the caller should treat a wire failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network trouble or a 5xx response. Worth retrying.
    Transient,
    /// Rejected request, missing object or auth failure. Retrying will not help.
    Permanent,
    /// The backend speaks a protocol version this client does not.
    Schema,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Schema => "schema",
        })
    }
}

/// Errors returned by a [`crate::CacheBackend`].
#[derive(Debug, Error)]
pub enum WireError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("authentication rejected ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("protocol version mismatch: {0}")]
    Schema(String),

    #[error("malformed response: {0}")]
    Codec(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl WireError {
    /// Classify this error for the retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } => ErrorKind::Transient,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Auth { .. }
            | Self::Rejected { .. }
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::Codec(_)
            | Self::InvalidRequest(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Map a non-success HTTP status to an error.
    ///
    /// 404 and 409 are only mapped here when the caller has no better
    /// context; operations that expect them handle them first.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let code = status.as_u16();
        if status.is_server_error() {
            Self::Server { status: code, body }
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            Self::Auth { status: code, body }
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Self::NotFound(body)
        } else if status == reqwest::StatusCode::CONFLICT {
            Self::Conflict(body)
        } else {
            Self::Rejected { status: code, body }
        }
    }
}

impl From<reqwest::Error> for WireError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status, e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<larder_core::Error> for WireError {
    fn from(e: larder_core::Error) -> Self {
        if e.is_schema() {
            Self::Schema(e.to_string())
        } else {
            Self::Codec(e.to_string())
        }
    }
}

/// Result type for wire operations.
pub type WireResult<T> = std::result::Result<T, WireError>;
