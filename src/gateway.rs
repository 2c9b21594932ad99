//! Shared contract for the external gateways (repository storage, language model).
//!
//! Gateways report failures as a [`GatewayError`] whose [`GatewayErrorKind`]
//! is matched by value; callers never inspect the message text.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by gateway trait methods.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Classification of a gateway failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Credentials were missing or rejected
    AuthFailed,
    /// The addressed resource (file, model) does not exist
    NotFound,
    /// The remote rejected a stale version token
    Conflict,
    /// Transport failure (connect, timeout, broken body)
    Network,
    /// Anything else
    Generic,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GatewayErrorKind::AuthFailed => "authentication failed",
            GatewayErrorKind::NotFound => "not found",
            GatewayErrorKind::Conflict => "conflict",
            GatewayErrorKind::Network => "network error",
            GatewayErrorKind::Generic => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::AuthFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Conflict, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Network, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Generic, message)
    }

    pub fn is_auth_failure(&self) -> bool {
        self.kind == GatewayErrorKind::AuthFailed
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == GatewayErrorKind::NotFound
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::network("Request timed out. Please try again.")
        } else if err.is_connect() {
            GatewayError::network("Could not connect. Check your network and try again.")
        } else if err.is_request() || err.is_body() {
            GatewayError::network(err.to_string())
        } else {
            GatewayError::generic(err.to_string())
        }
    }
}
