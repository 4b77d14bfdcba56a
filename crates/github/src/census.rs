//! Top-level census operations.
//!
//! [`Census`] wires transport, scheduler, cache, client and depaginator
//! together once per process and exposes the questions the command line asks:
//! who contributed to a repository, an organization, or a user's
//! repositories, and what the raw activity tree looks like.

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use contributors::{
    merge_repo_results, time_filter_full_tree, Login, QueryNode, RepoName, RunId, Synopsis,
    TimeWindow,
};

use crate::cache::DiskCache;
use crate::client::GraphqlClient;
use crate::config::GithubConfig;
use crate::depaginate::{prune, Depaginator};
use crate::errors::ClientError;
use crate::queries::{self, RepoRef, RepoSelection};
use crate::request::{RequestFlags, Token};
use crate::scheduler::Scheduler;
use crate::transport::{HttpTransport, Transport};

/// Per-run options handed in by the caller.
#[derive(Debug, Clone)]
pub struct CensusOptions {
    /// API credential. Without one every operation fails with
    /// [`ClientError::MissingToken`] before touching the network.
    pub token: Option<Token>,
    /// Only activity created inside this window counts.
    pub window: TimeWindow,
    /// Include default-branch commit authors and commit commentators.
    pub commits: bool,
    /// Include reactions.
    pub reactions: bool,
    /// Log the cost of every request at `info`.
    pub verbose: bool,
    /// Log query text and results.
    pub debug: bool,
    /// Ask for cost estimates only.
    pub dry_run: bool,
}

impl Default for CensusOptions {
    fn default() -> Self {
        Self {
            token: None,
            window: TimeWindow::all_time(),
            commits: false,
            reactions: false,
            verbose: false,
            debug: false,
            dry_run: false,
        }
    }
}

/// The census engine.
#[derive(Debug, Clone)]
pub struct Census {
    depaginator: Depaginator,
    selection: RepoSelection,
}

impl Census {
    /// Builds the engine over HTTPS.
    pub fn new(options: CensusOptions, config: &GithubConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.client)?;
        Ok(Self::with_transport(options, config, Arc::new(transport)))
    }

    /// Builds the engine over any transport. Must run inside a tokio runtime.
    pub fn with_transport(
        options: CensusOptions,
        config: &GithubConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let scheduler = Scheduler::new(transport, config.scheduler.clone());
        let cache = config
            .cache
            .enabled
            .then(|| DiskCache::new(&config.cache));
        let flags = RequestFlags {
            verbose: options.verbose,
            debug: options.debug,
            dry_run: options.dry_run,
        };
        let client = GraphqlClient::new(scheduler, cache, options.token, flags);
        Self {
            depaginator: Depaginator::new(client, config.client.page_size),
            selection: RepoSelection {
                window: options.window,
                commits: options.commits,
                reactions: options.reactions,
                page_size: config.client.page_size,
            },
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &GraphqlClient {
        self.depaginator.client()
    }

    async fn pruned(&self, query: &QueryNode) -> Result<Value, ClientError> {
        let value = self.depaginator.fetch(query).await?;
        Ok(prune(query, value))
    }

    async fn repo_tree(&self, repo: &RepoRef) -> Result<Value, ClientError> {
        self.pruned(&queries::repository(repo, &self.selection)).await
    }

    async fn repo_synopsis(&self, repo: &RepoRef) -> Result<Synopsis, ClientError> {
        let tree = self.repo_tree(repo).await?;
        Ok(queries::synopsis(&tree, &self.selection))
    }

    /// Contributors to one repository.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), repo = %repo))]
    pub async fn repo_contributors(&self, repo: &RepoRef) -> Result<Synopsis, ClientError> {
        self.repo_synopsis(repo).await
    }

    /// Every repository of an organization.
    pub async fn org_repos(&self, org: &Login) -> Result<Vec<RepoRef>, ClientError> {
        let tree = self
            .pruned(&queries::organization_repositories(org, self.selection.page_size))
            .await?;
        Ok(queries::repo_refs(&tree))
    }

    /// Every repository of a user.
    pub async fn user_repos(&self, user: &Login) -> Result<Vec<RepoRef>, ClientError> {
        let tree = self
            .pruned(&queries::user_repositories(user, self.selection.page_size))
            .await?;
        Ok(queries::repo_refs(&tree))
    }

    /// Names of every repository of a user.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), user = %user))]
    pub async fn user_repo_names(&self, user: &Login) -> Result<Vec<RepoName>, ClientError> {
        let repos = self.user_repos(user).await?;
        Ok(repos.into_iter().map(|repo| repo.name).collect())
    }

    async fn merged(&self, repos: Vec<RepoRef>) -> Result<Synopsis, ClientError> {
        info!(repositories = repos.len(), "collecting contributors");
        let synopses = try_join_all(repos.iter().map(|repo| self.repo_synopsis(repo))).await?;
        Ok(merge_repo_results(synopses))
    }

    /// Contributors across every repository of an organization.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), org = %org))]
    pub async fn org_contributors(&self, org: &Login) -> Result<Synopsis, ClientError> {
        let repos = self.org_repos(org).await?;
        self.merged(repos).await
    }

    /// Contributors across every repository of a user.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), user = %user))]
    pub async fn user_contributors(&self, user: &Login) -> Result<Synopsis, ClientError> {
        let repos = self.user_repos(user).await?;
        self.merged(repos).await
    }

    /// The pruned activity tree of one repository, filtered to the window.
    /// `null` when nothing happened.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), repo = %repo))]
    pub async fn repo_full(&self, repo: &RepoRef) -> Result<Value, ClientError> {
        let tree = self.repo_tree(repo).await?;
        Ok(time_filter_full_tree(&tree, self.selection.window))
    }

    async fn full_trees(&self, repos: Vec<RepoRef>) -> Result<Value, ClientError> {
        let trees = try_join_all(repos.iter().map(|repo| self.repo_tree(repo))).await?;
        let mut by_repo = Map::new();
        for (repo, tree) in repos.iter().zip(trees) {
            let filtered = time_filter_full_tree(&tree, self.selection.window);
            if !filtered.is_null() {
                by_repo.insert(repo.to_string(), filtered);
            }
        }
        Ok(Value::Object(by_repo))
    }

    /// Filtered activity trees of every repository of an organization, keyed
    /// by `owner/name`. Repositories without activity are left out.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), org = %org))]
    pub async fn org_full(&self, org: &Login) -> Result<Value, ClientError> {
        let repos = self.org_repos(org).await?;
        self.full_trees(repos).await
    }

    /// [`Census::org_full`] for a user's repositories.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), user = %user))]
    pub async fn user_full(&self, user: &Login) -> Result<Value, ClientError> {
        let repos = self.user_repos(user).await?;
        self.full_trees(repos).await
    }

    /// Runs an arbitrary query tree (for example one loaded with
    /// [`QueryNode::from_json`]) and returns its depaginated, pruned and
    /// window-filtered result.
    #[instrument(skip_all, fields(run_id = %RunId::new_random(), root = query.name()))]
    pub async fn run_query(&self, query: &QueryNode) -> Result<Value, ClientError> {
        let tree = self.pruned(query).await?;
        Ok(time_filter_full_tree(&tree, self.selection.window))
    }

    /// Waits until no request is queued or in flight and every cache write
    /// has settled. The engine rejects further requests afterwards.
    pub async fn shutdown(&self) {
        self.client().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestEnvelope;
    use crate::transport::{RateLimitHeaders, RawResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers by the root field of each query.
    struct ByRoot {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for ByRoot {
        async fn post(&self, envelope: &RequestEnvelope) -> Result<RawResponse, ClientError> {
            self.queries.lock().unwrap().push(envelope.query_text.clone());
            let data = if envelope.query_text.starts_with("organization") {
                json!({"organization": {"id": "O1", "__typename": "Organization", "repositories": {
                    "pageInfo": {"endCursor": null, "hasNextPage": false},
                    "nodes": [
                        {"id": "R1", "__typename": "Repository", "name": "a", "owner": {"login": "ipfs"}},
                        {"id": "R2", "__typename": "Repository", "name": "b", "owner": {"login": "ipfs"}}
                    ]}}})
            } else {
                let empty = json!({"pageInfo": {"endCursor": null, "hasNextPage": false}, "nodes": []});
                let pr = json!({"pageInfo": {"endCursor": null, "hasNextPage": false}, "nodes": [
                    {"id": "P1", "__typename": "PullRequest", "createdAt": "2017-03-01T00:00:00Z",
                     "author": {"__typename": "User", "login": "alice", "name": null, "url": "u"},
                     "comments": empty.clone(), "reviews": empty.clone()}
                ]});
                json!({"repository": {"id": "R", "__typename": "Repository",
                                      "pullRequests": pr, "issues": empty}})
            };
            Ok(RawResponse {
                status: 200,
                headers: RateLimitHeaders {
                    remaining: Some(100),
                    ..RateLimitHeaders::default()
                },
                body: serde_json::to_vec(&json!({ "data": data })).unwrap(),
            })
        }
    }

    fn census(transport: Arc<ByRoot>, token: Option<&str>) -> Census {
        let mut config = GithubConfig::default();
        config.cache.enabled = false;
        let options = CensusOptions {
            token: token.and_then(Token::new),
            ..CensusOptions::default()
        };
        Census::with_transport(options, &config, transport)
    }

    fn transport() -> Arc<ByRoot> {
        Arc::new(ByRoot {
            queries: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn org_contributors_merge_every_repository() {
        let transport = transport();
        let census = census(transport.clone(), Some("t"));

        let synopsis = census
            .org_contributors(&Login::new("ipfs").unwrap())
            .await
            .unwrap();

        assert_eq!(synopsis.pr_creators.len(), 1);
        assert_eq!(synopsis.pr_creators[0].login.as_str(), "alice");
        assert_eq!(synopsis.pr_creators[0].count, 2);
        assert_eq!(transport.queries.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn full_mode_keys_trees_by_repository() {
        let census = census(transport(), Some("t"));

        let full = census.org_full(&Login::new("ipfs").unwrap()).await.unwrap();

        assert_eq!(full["ipfs/a"]["pullRequests"][0]["author"]["login"], "alice");
        assert!(full["ipfs/b"].is_object());
    }

    #[tokio::test]
    async fn operations_without_a_token_never_reach_the_network() {
        let transport = transport();
        let census = census(transport.clone(), None);

        let err = census
            .user_repo_names(&Login::new("octocat").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::MissingToken));
        assert!(transport.queries.lock().unwrap().is_empty());
    }
}
