//! Core domain for the contributor census.
//!
//! This crate contains every domain concept shared by the census engine: the
//! typed GraphQL query-tree DSL and its wire serialisation, newtype
//! identifiers, value types, and the aggregation rules that reduce
//! depaginated response trees into contributor synopses. The `github` crate
//! performs all I/O; it never adds domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic.** This crate has no I/O dependencies. It defines *what*
//! is asked and *how results combine*; infrastructure defines *how* requests
//! reach the provider.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`Login`, `RepoName`, `Cursor`, `RunId`, etc.) |
//! | [`types`] | Value types (`Timestamp`, `TimeWindow`, `ContributionRecord`, `Synopsis`, ...) |
//! | [`errors`] | Query construction errors and the retry-policy vocabulary |
//! | [`query`] | Immutable query-tree builder |
//! | [`render`] | Deterministic query serialisation and cost wrapping |
//! | [`aggregate`] | Time filtering and contributor merging |
//!
//! [`merge_labelled_contributions`] is a library-only helper: no built-in
//! census query selects labels, so it serves callers that select them in
//! their own query trees.

pub mod aggregate;
pub mod errors;
pub mod identifiers;
pub mod query;
pub mod render;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use aggregate::{
    merge_arrays, merge_contributions, merge_labelled_contributions, merge_repo_results,
    time_filter, time_filter_full_tree, users, Dated, LabelledContribution,
};
pub use errors::{QueryError, RetryPolicy};
pub use identifiers::{Cursor, GraphqlId, Login, RepoName, RunId, TypeName};
pub use query::{args, edge, leaf, node, noid, typed, ArgValue, Args, Fragment, QueryKind, QueryNode};
pub use render::{cost_wrapped, request_body, to_query_string, wrap_with_cost};
pub use types::{Category, ContributionRecord, QueryCost, Synopsis, TimeWindow, Timestamp};
