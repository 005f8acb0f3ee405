//! Backend client error types

use thiserror::Error;

/// Backend call failure with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Timeout, message)
    }

    pub fn status(code: u16, body: &str) -> Self {
        Self::new(
            ClientErrorKind::Status(code),
            format!("HTTP {code}: {}", truncate(body, 200)),
        )
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Malformed, message)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::timeout(e.to_string())
        } else if e.is_decode() {
            ClientError::malformed(e.to_string())
        } else if let Some(status) = e.status() {
            ClientError::new(ClientErrorKind::Status(status.as_u16()), e.to_string())
        } else {
            ClientError::network(e.to_string())
        }
    }
}

/// Error classification, used for logging only: no backend call is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Connection refused, reset, DNS failure
    Network,
    /// Client-side timeout elapsed
    Timeout,
    /// Non-success HTTP status
    Status(u16),
    /// Body was not the expected JSON
    Malformed,
}

impl ClientErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Status(_) => "status",
            Self::Malformed => "malformed",
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
