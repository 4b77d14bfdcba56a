//! Newtype domain identifiers.
//!
//! Every concept with an identity is a distinct newtype wrapping a primitive.
//! This prevents accidentally interchanging, for example, a [`Login`] with a
//! [`RepoName`] even though both are strings on the wire, or feeding a
//! pagination [`Cursor`] where an object [`GraphqlId`] is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: provider-assigned
// ---------------------------------------------------------------------------

string_id! {
    /// A GitHub account login (user, bot, or organization).
    ///
    /// The login is the unique identity key when merging contributions.
    Login
}

string_id! {
    /// A repository name without its owner (e.g. `"name-your-contributors"`).
    RepoName
}

string_id! {
    /// An opaque global object id, as returned in the `id` field of any
    /// object implementing the provider's `Node` interface.
    ///
    /// Continuation queries are keyed by this value.
    GraphqlId
}

string_id! {
    /// An opaque pagination cursor (`pageInfo.endCursor`).
    Cursor
}

string_id! {
    /// A concrete GraphQL object type name as reported by `__typename`
    /// (e.g. `"Repository"`, `"PullRequest"`, `"User"`).
    TypeName
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single census run (one top-level repository, organization,
/// or user query and all of its continuation requests).
///
/// Generated fresh for every run and recorded on the root tracing span so
/// all requests issued for one run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
