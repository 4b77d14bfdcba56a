//! Error type for every GitHub-facing operation.
//!
//! [`ClientError`] distinguishes terminal failures, which reach the caller,
//! from throttling signals (`RateLimited`, `AbuseDetected`), which the
//! scheduler absorbs by backing off and re-admitting the same request. The
//! split is expressed through [`ClientError::retry_policy`].

use std::time::Duration;

use contributors::{QueryError, RetryPolicy};
use thiserror::Error;

/// Errors produced while executing census queries.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// No API token was configured. Raised before any network call.
    #[error("Unauthorized: no API token configured")]
    MissingToken,

    /// Transport-level I/O failure (DNS, connect, TLS, reset, timeout).
    #[error("Network error: {message}")]
    Network {
        /// Transport error description.
        message: String,
    },

    /// A non-200 status that is neither a rate limit nor abuse throttling.
    #[error("HTTP status {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// HTTP 200 without usable `data`; carries the full response payload.
    #[error("Graphql error: {payload}")]
    Graphql {
        /// The decoded response body.
        payload: serde_json::Value,
    },

    /// The response body was not valid JSON.
    #[error("JSON error: {message}")]
    Json {
        /// Parser error description.
        message: String,
    },

    /// Primary quota exhausted; retry once the window resets.
    #[error("Rate limit exceeded; retry after {after:?}")]
    RateLimited {
        /// Time until the quota window resets.
        after: Duration,
    },

    /// Secondary (abuse) throttle triggered; retry after the advertised delay.
    #[error("Abuse detection triggered; retry after {after:?}")]
    AbuseDetected {
        /// Provider-specified wait.
        after: Duration,
    },

    /// The configured backoff cap was reached for one request.
    #[error("Gave up after {attempts} throttled attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The scheduler has shut down and no longer admits requests.
    #[error("Scheduler is closed")]
    SchedulerClosed,

    /// Reading or writing the response cache failed.
    #[error("Cache error: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },

    /// A connection reported more pages but its parent object has no id to
    /// continue from.
    #[error("Cannot paginate {field}: parent object has no id")]
    UnpageableEdge {
        /// Name of the connection field.
        field: String,
    },

    /// The query tree could not be built.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl ClientError {
    /// Whether the scheduler may transparently retry the identical request.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimited { after } | Self::AbuseDetected { after } => {
                RetryPolicy::Retryable {
                    after: Some(*after),
                }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Cache {
            message: err.to_string(),
        }
    }
}
