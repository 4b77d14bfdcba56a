//! Shared value types for the contributor census.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! values with invariants (a time window never ends before it starts,
//! synopsis categories are sorted by descending count) and participate in
//! aggregation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::Login;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// The Unix epoch, the default lower bound of a census window.
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 timestamp as returned by the provider
    /// (e.g. `"2017-11-20T16:35:31Z"`).
    pub fn parse(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

// ---------------------------------------------------------------------------

/// An inclusive time window `[after, before]`.
///
/// Both bounds are inclusive: an entity created exactly at `after` or exactly
/// at `before` is inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    after: Timestamp,
    before: Timestamp,
}

impl TimeWindow {
    /// Creates a window, returning `None` if `before` precedes `after`.
    #[must_use]
    pub fn new(after: Timestamp, before: Timestamp) -> Option<Self> {
        if before < after {
            None
        } else {
            Some(Self { after, before })
        }
    }

    /// Everything from the Unix epoch until now.
    pub fn all_time() -> Self {
        Self {
            after: Timestamp::epoch(),
            before: Timestamp::now(),
        }
    }

    /// Lower (inclusive) bound.
    pub fn after(self) -> Timestamp {
        self.after
    }

    /// Upper (inclusive) bound.
    pub fn before(self) -> Timestamp {
        self.before
    }

    /// Returns `true` if `at` lies within `after ≤ at ≤ before`.
    pub fn contains(self, at: Timestamp) -> bool {
        self.after <= at && at <= self.before
    }
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// Provider quota state reported alongside every cost-wrapped query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCost {
    /// Quota units this query consumed (or would consume, for a dry run).
    pub cost: u64,
    /// Quota units left in the current window.
    pub remaining: u64,
    /// When the quota window resets.
    pub reset_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

/// One contributor's tally within a category.
///
/// `login` is the identity key; `name`, `url` and `email` come from the first
/// occurrence of that login seen during a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    /// Account login.
    pub login: Login,
    /// Display name, when the account exposes one.
    pub name: Option<String>,
    /// Profile URL.
    pub url: Option<String>,
    /// Public email, when available.
    pub email: Option<String>,
    /// Number of contributions counted for this login.
    pub count: u64,
}

impl ContributionRecord {
    /// A record for a single contribution by `login`.
    pub fn single(login: Login) -> Self {
        Self {
            login,
            name: None,
            url: None,
            email: None,
            count: 1,
        }
    }
}

/// The fixed set of synopsis categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// Authors of pull requests.
    PrCreators,
    /// Authors of pull request comments.
    PrCommentators,
    /// Authors of issues.
    IssueCreators,
    /// Authors of issue comments.
    IssueCommentators,
    /// Authors of pull request reviews.
    Reviewers,
    /// Users who reacted to pull requests, issues, or their comments.
    Reactors,
    /// Authors of commits on the default branch.
    CommitAuthors,
    /// Authors of commit comments.
    CommitCommentators,
}

impl Category {
    /// Every category, in output order.
    pub const ALL: [Category; 8] = [
        Category::PrCreators,
        Category::PrCommentators,
        Category::IssueCreators,
        Category::IssueCommentators,
        Category::Reviewers,
        Category::Reactors,
        Category::CommitAuthors,
        Category::CommitCommentators,
    ];

    /// Human-readable label used by tabular output (e.g. `"pr creator"`).
    pub fn label(self) -> &'static str {
        match self {
            Category::PrCreators => "pr creator",
            Category::PrCommentators => "pr commentator",
            Category::IssueCreators => "issue creator",
            Category::IssueCommentators => "issue commentator",
            Category::Reviewers => "reviewer",
            Category::Reactors => "reactor",
            Category::CommitAuthors => "commit author",
            Category::CommitCommentators => "commit commentator",
        }
    }
}

/// Per-category contributor lists for one repository or a merged rollup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synopsis {
    /// Authors of pull requests.
    pub pr_creators: Vec<ContributionRecord>,
    /// Authors of pull request comments.
    pub pr_commentators: Vec<ContributionRecord>,
    /// Authors of issues.
    pub issue_creators: Vec<ContributionRecord>,
    /// Authors of issue comments.
    pub issue_commentators: Vec<ContributionRecord>,
    /// Authors of pull request reviews.
    pub reviewers: Vec<ContributionRecord>,
    /// Reactors; empty unless reactions were collected.
    pub reactors: Vec<ContributionRecord>,
    /// Default-branch commit authors; empty unless commits were collected.
    pub commit_authors: Vec<ContributionRecord>,
    /// Commit comment authors; empty unless commits were collected.
    pub commit_commentators: Vec<ContributionRecord>,
}

impl Synopsis {
    /// Returns the records of one category.
    pub fn category(&self, category: Category) -> &[ContributionRecord] {
        match category {
            Category::PrCreators => &self.pr_creators,
            Category::PrCommentators => &self.pr_commentators,
            Category::IssueCreators => &self.issue_creators,
            Category::IssueCommentators => &self.issue_commentators,
            Category::Reviewers => &self.reviewers,
            Category::Reactors => &self.reactors,
            Category::CommitAuthors => &self.commit_authors,
            Category::CommitCommentators => &self.commit_commentators,
        }
    }

    /// Mutable access to one category.
    pub fn category_mut(&mut self, category: Category) -> &mut Vec<ContributionRecord> {
        match category {
            Category::PrCreators => &mut self.pr_creators,
            Category::PrCommentators => &mut self.pr_commentators,
            Category::IssueCreators => &mut self.issue_creators,
            Category::IssueCommentators => &mut self.issue_commentators,
            Category::Reviewers => &mut self.reviewers,
            Category::Reactors => &mut self.reactors,
            Category::CommitAuthors => &mut self.commit_authors,
            Category::CommitCommentators => &mut self.commit_commentators,
        }
    }

    /// Returns `true` if every category is empty.
    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.category(*c).is_empty())
    }

    /// Sorts every category by descending count. The sort is stable, so ties
    /// keep first-insertion order.
    #[must_use]
    pub fn sorted(mut self) -> Self {
        for category in Category::ALL {
            self.category_mut(category)
                .sort_by(|a, b| b.count.cmp(&a.count));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let t = ts("2017-09-24T00:00:00Z");
        let window = TimeWindow::new(t, t).unwrap();
        assert!(window.contains(t));
        assert!(!window.contains(ts("2017-09-23T23:59:59.999Z")));
    }

    #[test]
    fn timestamps_display_in_zulu_form() {
        assert_eq!(ts("2017-09-24T00:00:00+00:00").to_string(), "2017-09-24T00:00:00Z");
        assert_eq!(ts("2017-09-24T00:00:00.250Z").to_string(), "2017-09-24T00:00:00.250Z");
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(TimeWindow::new(ts("2018-01-01T00:00:00Z"), ts("2017-01-01T00:00:00Z")).is_none());
    }

    #[test]
    fn synopsis_serializes_camel_case_categories() {
        let value = serde_json::to_value(Synopsis::default()).unwrap();
        for key in [
            "prCreators",
            "prCommentators",
            "issueCreators",
            "issueCommentators",
            "reviewers",
            "reactors",
            "commitAuthors",
            "commitCommentators",
        ] {
            assert_eq!(value[key], serde_json::json!([]), "missing {key}");
        }
    }

    #[test]
    fn sorted_orders_by_descending_count_and_keeps_ties_stable() {
        let record = |login: &str, count| ContributionRecord {
            count,
            ..ContributionRecord::single(Login::new(login).unwrap())
        };
        let synopsis = Synopsis {
            reviewers: vec![record("a", 1), record("b", 5), record("c", 1)],
            ..Synopsis::default()
        }
        .sorted();
        let logins: Vec<_> = synopsis.reviewers.iter().map(|r| r.login.as_str()).collect();
        assert_eq!(logins, ["b", "a", "c"]);
    }
}
