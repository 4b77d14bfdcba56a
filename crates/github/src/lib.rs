//! GitHub GraphQL infrastructure for the contributor census.
//!
//! Executes the query trees defined in the [`contributors`] crate against the
//! GitHub GraphQL v4 API and completes their paginated connections.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! All GitHub API details (rate limiting, abuse throttling, pagination,
//! authentication, caching) are handled here; the [`contributors`] crate never
//! sees them.
//!
//! ## Request Path
//!
//! ```text
//! Census ─► Depaginator ─► GraphqlClient ─► DiskCache (hit? done)
//!                                        └► Scheduler ─► Transport (HTTP POST)
//! ```
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | Serde-deserializable configuration with defaults |
//! | [`errors`] | [`ClientError`] and its retry classification |
//! | [`request`] | Tokens, request flags, and the request envelope |
//! | [`transport`] | The [`Transport`] seam, the reqwest implementation, response classification |
//! | [`scheduler`] | Single-queue admission control with coordinated backoff |
//! | [`cache`] | Content-addressed on-disk response cache |
//! | [`client`] | Cache-then-scheduler execution facade |
//! | [`depaginate`] | Continuation queries and result pruning |
//! | [`queries`] | GitHub v4 schema adapter and synopsis extraction |
//! | [`census`] | Repository, organization, and user census operations |

pub mod cache;
pub mod census;
pub mod client;
pub mod config;
pub mod depaginate;
pub mod errors;
pub mod queries;
pub mod request;
pub mod scheduler;
pub mod transport;

pub use cache::{CacheKey, DiskCache};
pub use census::{Census, CensusOptions};
pub use client::{Execution, GraphqlClient};
pub use config::{CacheConfig, ClientConfig, GithubConfig, SchedulerConfig};
pub use depaginate::{prune, Depaginator};
pub use errors::ClientError;
pub use queries::{RepoRef, RepoSelection};
pub use request::{RequestEnvelope, RequestFlags, Token};
pub use scheduler::Scheduler;
pub use transport::{HttpTransport, RateLimitHeaders, RawResponse, Transport};
