//! Failure taxonomy for the CoPilot client core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CopilotError>;

/// Errors surfaced by the client core and its transport.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CopilotError {
    #[error("unable to connect to server: {0}")]
    Connection(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        /// Server-suggested wait in seconds, from the `Retry-After` header.
        retry_after: Option<u64>,
    },
    #[error("[{status}] {message}")]
    Server { status: u16, message: String },
    #[error("[{status}] {message}")]
    Client { status: u16, message: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a failure, used by the retry policy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Connection,
    Timeout,
    RateLimited,
    Server,
    Client,
    Stream,
    Other,
}

impl CopilotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Server { .. } => ErrorKind::Server,
            Self::Client { .. } => ErrorKind::Client,
            Self::Stream(_) => ErrorKind::Stream,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-suggested retry delay in seconds. Only rate-limit failures carry one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP error status the way the service reports failures.
    ///
    /// `retry_after` is the parsed `Retry-After` value and is only meaningful
    /// for 429 responses.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            500..=599 => Self::Server { status, message },
            400..=499 => Self::Client { status, message },
            _ => Self::Other(message),
        }
    }
}

impl From<reqwest::Error> for CopilotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string(), None)
        } else {
            Self::Other(err.to_string())
        }
    }
}
