//! GitHub GraphQL v4 schema adapter.
//!
//! Everything that knows field names of the provider's schema lives here:
//! the query trees for repositories, organizations and users, and the
//! extraction of a [`Synopsis`] from a depaginated, pruned repository tree.
//! When the schema drifts, this module changes and the depaginator does not.
//!
//! Top-level connections ask for a full page up front. Nested connections
//! keep the builder's default of one item: most pull requests have few
//! comments, and the depaginator fetches the rest through the owning object.

use serde_json::Value;

use contributors::{
    args, edge, leaf, merge_contributions, node, noid, time_filter, typed, users, Args, Category,
    Login, QueryNode, RepoName, Synopsis, TimeWindow,
};

/// Which parts of a repository's activity to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoSelection {
    /// Only activity created inside this window counts.
    pub window: TimeWindow,
    /// Collect default-branch commit authors and commit commentators.
    pub commits: bool,
    /// Collect reactions on pull requests, issues and their comments.
    pub reactions: bool,
    /// `first` argument of top-level connections.
    pub page_size: u32,
}

/// An `owner/name` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    /// Owning user or organization.
    pub owner: Login,
    /// Repository name.
    pub name: RepoName,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Query trees
// ---------------------------------------------------------------------------

fn profile() -> Vec<QueryNode> {
    vec![leaf("login"), leaf("name"), leaf("url")]
}

/// The `author` of an issue, pull request, comment or review (an `Actor`).
fn author() -> QueryNode {
    typed(
        "author",
        Args::new(),
        [
            ("User", profile()),
            ("Bot", vec![leaf("login"), leaf("url")]),
            ("Mannequin", vec![leaf("login"), leaf("url")]),
        ],
    )
}

/// The `author` of a commit (a `GitActor`), linked to an account if any.
fn git_author() -> QueryNode {
    noid(
        "author",
        Args::new(),
        [leaf("email"), leaf("name"), node("user", Args::new(), profile())],
    )
}

fn reactions() -> QueryNode {
    edge(
        "reactions",
        Args::new(),
        [leaf("createdAt"), node("user", Args::new(), profile())],
    )
}

/// Author and creation time, plus reactions when selected.
fn authored(selection: &RepoSelection) -> Vec<QueryNode> {
    let mut fields = vec![author(), leaf("createdAt")];
    if selection.reactions {
        fields.push(reactions());
    }
    fields
}

fn comments(selection: &RepoSelection) -> QueryNode {
    edge("comments", Args::new(), authored(selection))
}

fn pull_requests(selection: &RepoSelection) -> QueryNode {
    let mut fields = authored(selection);
    fields.push(comments(selection));
    fields.push(edge("reviews", Args::new(), [author(), leaf("createdAt")]));
    edge("pullRequests", args([("first", selection.page_size.into())]), fields)
}

fn issues(selection: &RepoSelection) -> QueryNode {
    let mut fields = authored(selection);
    fields.push(comments(selection));
    edge("issues", args([("first", selection.page_size.into())]), fields)
}

fn commit_comments(selection: &RepoSelection) -> QueryNode {
    edge(
        "commitComments",
        args([("first", selection.page_size.into())]),
        [author(), leaf("createdAt")],
    )
}

/// Default-branch history, bounded server-side by the window.
fn history(selection: &RepoSelection) -> QueryNode {
    let history = edge(
        "history",
        args([
            ("first", selection.page_size.into()),
            ("since", selection.window.after().into()),
            ("until", selection.window.before().into()),
        ]),
        [leaf("committedDate"), git_author()],
    );
    node(
        "defaultBranchRef",
        Args::new(),
        [typed("target", Args::new(), [("Commit", vec![leaf("id"), history])])],
    )
}

/// Everything needed for one repository's synopsis.
pub fn repository(repo: &RepoRef, selection: &RepoSelection) -> QueryNode {
    let mut fields = vec![pull_requests(selection), issues(selection)];
    if selection.commits {
        fields.push(commit_comments(selection));
        fields.push(history(selection));
    }
    node(
        "repository",
        args([("owner", (&repo.owner).into()), ("name", (&repo.name).into())]),
        fields,
    )
}

fn repository_names(page_size: u32) -> QueryNode {
    edge(
        "repositories",
        args([("first", page_size.into())]),
        [leaf("name"), noid("owner", Args::new(), [leaf("login")])],
    )
}

/// Names of every repository of an organization.
pub fn organization_repositories(org: &Login, page_size: u32) -> QueryNode {
    node(
        "organization",
        args([("login", org.into())]),
        [repository_names(page_size)],
    )
}

/// Names of every repository of a user.
pub fn user_repositories(user: &Login, page_size: u32) -> QueryNode {
    node("user", args([("login", user.into())]), [repository_names(page_size)])
}

// ---------------------------------------------------------------------------
// Result extraction (pruned trees)
// ---------------------------------------------------------------------------

fn items<'a>(value: &'a Value, field: &str) -> Vec<&'a Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

fn children<'a>(parents: &[&'a Value], field: &str) -> Vec<&'a Value> {
    parents.iter().flat_map(|parent| items(parent, field)).collect()
}

/// Repositories listed by [`organization_repositories`] or
/// [`user_repositories`], after pruning.
pub fn repo_refs(owner_tree: &Value) -> Vec<RepoRef> {
    items(owner_tree, "repositories")
        .into_iter()
        .filter_map(|repo| {
            Some(RepoRef {
                owner: Login::new(repo.get("owner")?.get("login")?.as_str()?)?,
                name: RepoName::new(repo.get("name")?.as_str()?)?,
            })
        })
        .collect()
}

/// Reduces a pruned [`repository`] result to per-category contributors.
/// Categories that were not selected stay empty.
pub fn synopsis(repository: &Value, selection: &RepoSelection) -> Synopsis {
    let window = selection.window;
    let tally = |entities: Vec<&Value>| merge_contributions(users(time_filter(window, entities)));

    let prs = items(repository, "pullRequests");
    let issues = items(repository, "issues");
    let pr_comments = children(&prs, "comments");
    let issue_comments = children(&issues, "comments");

    let mut synopsis = Synopsis::default();
    *synopsis.category_mut(Category::Reviewers) = tally(children(&prs, "reviews"));
    if selection.reactions {
        let mut reactions = children(&prs, "reactions");
        reactions.extend(children(&issues, "reactions"));
        reactions.extend(children(&pr_comments, "reactions"));
        reactions.extend(children(&issue_comments, "reactions"));
        *synopsis.category_mut(Category::Reactors) = tally(reactions);
    }
    if selection.commits {
        let history = &repository["defaultBranchRef"]["target"];
        *synopsis.category_mut(Category::CommitAuthors) = tally(items(history, "history"));
        *synopsis.category_mut(Category::CommitCommentators) =
            tally(items(repository, "commitComments"));
    }
    *synopsis.category_mut(Category::PrCreators) = tally(prs);
    *synopsis.category_mut(Category::PrCommentators) = tally(pr_comments);
    *synopsis.category_mut(Category::IssueCreators) = tally(issues);
    *synopsis.category_mut(Category::IssueCommentators) = tally(issue_comments);
    synopsis.sorted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contributors::{to_query_string, Timestamp};
    use serde_json::json;

    fn selection(commits: bool, reactions: bool) -> RepoSelection {
        RepoSelection {
            window: TimeWindow::new(
                Timestamp::parse("2017-01-01T00:00:00Z").unwrap(),
                Timestamp::parse("2017-12-31T23:59:59Z").unwrap(),
            )
            .unwrap(),
            commits,
            reactions,
            page_size: 100,
        }
    }

    fn repo() -> RepoRef {
        RepoRef {
            owner: Login::new("mntnr").unwrap(),
            name: RepoName::new("name-your-contributors").unwrap(),
        }
    }

    fn user(login: &str) -> Value {
        json!({"login": login, "name": login.to_uppercase(), "url": format!("https://github.com/{login}")})
    }

    #[test]
    fn repository_query_selects_only_what_is_asked_for() {
        let plain = to_query_string(&repository(&repo(), &selection(false, false)));
        assert!(plain.starts_with(
            "repository(name: \"name-your-contributors\", owner: \"mntnr\"){pullRequests(first: 100)"
        ));
        assert!(plain.contains("reviews(first: 1)"));
        assert!(!plain.contains("reactions"));
        assert!(!plain.contains("history"));

        let full = to_query_string(&repository(&repo(), &selection(true, true)));
        assert!(full.contains("reactions(first: 1)"));
        assert!(full.contains("commitComments(first: 100)"));
        assert!(full.contains(
            "history(first: 100, since: \"2017-01-01T00:00:00Z\", until: \"2017-12-31T23:59:59Z\")"
        ));
    }

    #[test]
    fn synopsis_counts_each_category_inside_the_window() {
        let tree = json!({
            "pullRequests": [
                {"author": user("alice"), "createdAt": "2017-03-01T00:00:00Z",
                 "comments": [
                     {"author": user("bob"), "createdAt": "2017-03-02T00:00:00Z"},
                     {"author": user("bob"), "createdAt": "2017-03-03T00:00:00Z"},
                     {"author": null, "createdAt": "2017-03-03T00:00:00Z"}
                 ],
                 "reviews": [{"author": user("carol"), "createdAt": "2017-03-04T00:00:00Z"}],
                 "reactions": [{"user": user("dave"), "createdAt": "2017-03-05T00:00:00Z"}]},
                {"author": user("alice"), "createdAt": "2016-03-01T00:00:00Z",
                 "comments": [], "reviews": [], "reactions": []}
            ],
            "issues": [
                {"author": user("erin"), "createdAt": "2017-05-01T00:00:00Z",
                 "comments": [{"author": user("alice"), "createdAt": "2017-05-02T00:00:00Z",
                               "reactions": [{"user": user("dave"), "createdAt": "2017-05-03T00:00:00Z"}]}],
                 "reactions": []}
            ],
            "commitComments": [{"author": user("frank"), "createdAt": "2017-06-01T00:00:00Z"}],
            "defaultBranchRef": {"target": {"history": [
                {"committedDate": "2017-07-01T00:00:00Z",
                 "author": {"email": "g@example.com", "name": "G", "user": user("grace")}},
                {"committedDate": "2017-07-02T00:00:00Z",
                 "author": {"email": "x@example.com", "name": "X", "user": null}}
            ]}}
        });

        let synopsis = synopsis(&tree, &selection(true, true));

        let logins = |c: Category| -> Vec<(String, u64)> {
            synopsis
                .category(c)
                .iter()
                .map(|r| (r.login.to_string(), r.count))
                .collect()
        };
        assert_eq!(logins(Category::PrCreators), [("alice".to_string(), 1)]);
        assert_eq!(logins(Category::PrCommentators), [("bob".to_string(), 2)]);
        assert_eq!(logins(Category::IssueCreators), [("erin".to_string(), 1)]);
        assert_eq!(logins(Category::IssueCommentators), [("alice".to_string(), 1)]);
        assert_eq!(logins(Category::Reviewers), [("carol".to_string(), 1)]);
        assert_eq!(logins(Category::Reactors), [("dave".to_string(), 2)]);
        assert_eq!(logins(Category::CommitCommentators), [("frank".to_string(), 1)]);
        assert_eq!(logins(Category::CommitAuthors), [("grace".to_string(), 1)]);
        assert_eq!(
            synopsis.commit_authors[0].email.as_deref(),
            Some("g@example.com")
        );
    }

    #[test]
    fn unselected_categories_stay_empty() {
        let tree = json!({
            "pullRequests": [{"author": user("alice"), "createdAt": "2017-03-01T00:00:00Z",
                              "reactions": [{"user": user("dave"), "createdAt": "2017-03-05T00:00:00Z"}]}],
            "commitComments": [{"author": user("frank"), "createdAt": "2017-06-01T00:00:00Z"}]
        });

        let synopsis = synopsis(&tree, &selection(false, false));

        assert!(synopsis.reactors.is_empty());
        assert!(synopsis.commit_commentators.is_empty());
        assert_eq!(synopsis.pr_creators.len(), 1);
    }

    #[test]
    fn repo_refs_read_owner_and_name() {
        let tree = json!({"repositories": [
            {"name": "a", "owner": {"login": "ipfs"}},
            {"name": "b", "owner": {"login": "ipfs"}},
            {"name": "", "owner": {"login": "ipfs"}}
        ]});

        let refs: Vec<String> = repo_refs(&tree).iter().map(ToString::to_string).collect();

        assert_eq!(refs, ["ipfs/a", "ipfs/b"]);
    }
}
