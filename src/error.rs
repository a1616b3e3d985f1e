use thiserror::Error;

/// Error type for every request made through the crate.
///
/// The `Display` output is always the human-readable message, so bindings
/// can render `error.to_string()` directly. The variants let callers tell a
/// retryable transport problem from a terminal answer by the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a usable response (network unreachable,
    /// timeout, malformed body).
    #[error("{0}")]
    Transport(String),

    /// The backend answered with a non-2xx status. `message` is the
    /// backend's own error text.
    #[error("{message}")]
    Application { status: u16, message: String },

    /// The request was rejected before it was sent.
    #[error("{0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(message)
            | Self::Application { message, .. }
            | Self::InvalidRequest(message) => message,
        }
    }

    /// Returns the HTTP status for application failures.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Application { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if repeating the same request might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Application { status, .. } => *status >= 500,
            Self::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
