//! Error types for session mocking.
//!
//! Two families live here:
//! - `MockError`: failures of the mocking layer itself (bad patterns, broken
//!   registry invariants, policy violations).
//! - `NetworkError`: the synthetic network failure handed to consumers through
//!   the same channel a real failure would use.

use std::fmt;

/// Error domain used for the well-known URL loading errors.
pub const URL_ERROR_DOMAIN: &str = "NSURLErrorDomain";

/// Code reported when a task is cancelled before it completes.
pub const URL_ERROR_CANCELLED: i64 = -999;

/// Code reported when a request cannot reach the network.
pub const URL_ERROR_NOT_CONNECTED: i64 = -1009;

/// Code reported when a task finished without a response or an error.
pub const URL_ERROR_BAD_SERVER_RESPONSE: i64 = -1011;

/// Failures raised by the mocking layer.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// A regular expression passed at registration time did not compile.
    #[error("Invalid request pattern '{expression}': {source}")]
    Pattern {
        expression: String,
        #[source]
        source: regex::Error,
    },

    /// A rule was asked to consume a request it does not match.
    #[error("Mock was asked to consume a request it does not match: {0}")]
    InvalidRequest(String),

    /// An ephemeral rule was consumed a second time.
    #[error("Ephemeral mock has already run")]
    HasAlreadyRun,

    /// The request evaluator rejected an unmocked request.
    #[error("Request {0} was not mocked but is required to be mocked")]
    PolicyViolation(String),

    /// A mocked task was created outside of a tokio runtime.
    #[error("Mocked tasks must be created inside a tokio runtime")]
    NoRuntime,
}

/// A synthetic network failure delivered to the consumer of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkError {
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl NetworkError {
    pub fn custom(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// The error reported to a consumer whose task was cancelled.
    pub fn cancelled() -> Self {
        Self::custom(URL_ERROR_DOMAIN, URL_ERROR_CANCELLED, "cancelled")
    }

    /// The error reported by a session that has no network to talk to.
    pub fn not_connected() -> Self {
        Self::custom(
            URL_ERROR_DOMAIN,
            URL_ERROR_NOT_CONNECTED,
            "The Internet connection appears to be offline.",
        )
    }

    pub fn bad_server_response() -> Self {
        Self::custom(
            URL_ERROR_DOMAIN,
            URL_ERROR_BAD_SERVER_RESPONSE,
            "The server returned no response.",
        )
    }

    pub fn is_cancellation(&self) -> bool {
        self.domain == URL_ERROR_DOMAIN && self.code == URL_ERROR_CANCELLED
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for NetworkError {}
