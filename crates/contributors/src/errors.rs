//! Query construction errors and the retry-policy vocabulary.
//!
//! [`QueryError`] covers conditions detected while building or loading a
//! query tree, before any network activity. Transport and provider failures
//! are defined in the `github` crate.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that
//! participates in backoff decisions must be able to produce one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the scheduler decide
/// whether to re-admit the identical request instead of rejecting it.
///
/// - `Retryable` errors: quota exhaustion, secondary (abuse) throttling.
/// - `NonRetryable` errors: transport failures, GraphQL errors, other HTTP
///   statuses, missing credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `retry-after` or `x-ratelimit-reset` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the caller receives the error.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing or loading a query tree.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum QueryError {
    /// A non-leaf node was described without an explicit arguments object.
    ///
    /// Arguments must always be an explicit map, even when empty.
    #[error("No args passed to {node}")]
    MissingArguments {
        /// Name of the offending node.
        node: String,
    },

    /// A query description document is malformed (unknown kind, missing
    /// name, non-scalar argument, ...).
    #[error("Invalid query description: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },
}
