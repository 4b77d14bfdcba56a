//! name-your-contributors entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse flags** and an optional JSON engine configuration file.
//! 2. **Wire observability**: `tracing-subscriber` on stderr, plus an
//!    OpenTelemetry OTLP exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 3. **Prepare the cache**: `--wipe-cache` runs before any query traffic.
//! 4. **Run one census** (organization, user, repository, or a query file)
//!    and print JSON, or CSV for synopses, on stdout.
//! 5. **Shut down cleanly**: wait for in-flight requests and cache writes.

mod output;
mod telemetry;

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::Parser;
use serde_json::Value;
use tracing::info;

use contributors::{Login, QueryNode, RepoName, Synopsis, TimeWindow, Timestamp};
use github::{Census, CensusOptions, DiskCache, GithubConfig, RepoRef, Token};

#[derive(Debug, Parser)]
#[command(
    name = "name-your-contributors",
    version,
    about = "Name the people who contributed to GitHub repositories and organizations"
)]
struct Cli {
    /// GitHub API token
    #[arg(short = 't', long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Repository to search (requires --user as its owner)
    #[arg(short = 'r', long)]
    repo: Option<String>,

    /// User owning --repo, or whose repositories are searched
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Search every repository of this organization
    #[arg(short = 'o', long)]
    org: Option<String>,

    /// Only count contributions at or after this time (RFC 3339 or YYYY-MM-DD)
    #[arg(short = 'a', long, value_parser = parse_time)]
    after: Option<Timestamp>,

    /// Only count contributions at or before this time (RFC 3339 or YYYY-MM-DD)
    #[arg(short = 'b', long, value_parser = parse_time)]
    before: Option<Timestamp>,

    /// Include default-branch commit authors and commit comments
    #[arg(long)]
    commits: bool,

    /// Include reactions
    #[arg(long)]
    reactions: bool,

    /// Print the filtered activity tree instead of a contributor synopsis
    #[arg(long)]
    full: bool,

    /// Print CSV instead of JSON
    #[arg(short = 'c', long, conflicts_with = "full")]
    csv: bool,

    /// Run the query described by this JSON document (implies --full)
    #[arg(long, conflicts_with_all = ["org", "user", "repo"])]
    query_file: Option<PathBuf>,

    /// JSON engine configuration (endpoint, scheduler, cache)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delete every cached response before querying
    #[arg(long)]
    wipe_cache: bool,

    /// Neither read nor write the response cache
    #[arg(long)]
    no_cache: bool,

    /// Maximum number of requests in flight
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log the cost of every request
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log every query and its result
    #[arg(long)]
    debug: bool,

    /// Ask the API for cost estimates without running the queries
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

/// Where to look.
#[derive(Debug)]
enum Target {
    Query(QueryNode),
    Org(Login),
    Repo(RepoRef),
    User(Login),
}

fn parse_time(value: &str) -> Result<Timestamp, String> {
    if let Some(ts) = Timestamp::parse(value) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Timestamp::from_utc(Utc.from_utc_datetime(&midnight)))
        .ok_or_else(|| format!("`{value}` is neither an RFC 3339 timestamp nor a YYYY-MM-DD date"))
}

fn login(flag: &str, value: &str) -> anyhow::Result<Login> {
    Login::new(value.trim()).with_context(|| format!("--{flag} must not be empty"))
}

impl Cli {
    fn window(&self) -> anyhow::Result<TimeWindow> {
        let after = self.after.unwrap_or_else(Timestamp::epoch);
        let before = self.before.unwrap_or_else(Timestamp::now);
        TimeWindow::new(after, before)
            .with_context(|| format!("--after ({after}) is later than --before ({before})"))
    }

    fn target(&self) -> anyhow::Result<Target> {
        if let Some(path) = &self.query_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading query file {}", path.display()))?;
            let description: Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing query file {}", path.display()))?;
            let query = QueryNode::from_json(&description)
                .with_context(|| format!("building query from {}", path.display()))?;
            return Ok(Target::Query(query));
        }
        match (&self.org, &self.user, &self.repo) {
            (Some(org), _, _) => Ok(Target::Org(login("org", org)?)),
            (None, Some(user), Some(repo)) => Ok(Target::Repo(RepoRef {
                owner: login("user", user)?,
                name: RepoName::new(repo.trim()).context("--repo must not be empty")?,
            })),
            (None, Some(user), None) => Ok(Target::User(login("user", user)?)),
            (None, None, _) => bail!(
                "specify an organization (-o), a user (-u), a user and a repository (-u -r), or --query-file"
            ),
        }
    }

    fn engine_config(&self) -> anyhow::Result<GithubConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => GithubConfig::default(),
        };
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(max) = self.max_concurrent {
            config.scheduler.max_concurrent = max.max(1);
        }
        Ok(config)
    }
}

enum Report {
    Synopsis(Synopsis),
    Tree(Value),
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.engine_config()?;
    let target = cli.target()?;
    let window = cli.window()?;

    if cli.wipe_cache {
        let removed = DiskCache::new(&config.cache)
            .wipe()
            .await
            .context("wiping response cache")?;
        info!(removed, dir = %config.cache.dir.display(), "response cache wiped");
    }

    let full = cli.full || matches!(target, Target::Query(_));
    let options = CensusOptions {
        token: cli.token.as_deref().and_then(Token::new),
        window,
        commits: cli.commits,
        reactions: cli.reactions,
        verbose: cli.verbose,
        debug: cli.debug,
        dry_run: cli.dry_run,
    };
    let census = Census::new(options, &config).context("building GitHub client")?;

    let report = match (&target, full) {
        (Target::Query(query), _) => census.run_query(query).await.map(Report::Tree),
        (Target::Org(org), false) => census.org_contributors(org).await.map(Report::Synopsis),
        (Target::Org(org), true) => census.org_full(org).await.map(Report::Tree),
        (Target::Repo(repo), false) => census.repo_contributors(repo).await.map(Report::Synopsis),
        (Target::Repo(repo), true) => census.repo_full(repo).await.map(Report::Tree),
        (Target::User(user), false) => census.user_contributors(user).await.map(Report::Synopsis),
        (Target::User(user), true) => census.user_full(user).await.map(Report::Tree),
    };
    census.shutdown().await;
    let report = report.context("census failed")?;

    let rendered = match report {
        Report::Synopsis(synopsis) if cli.csv => output::synopsis_csv(&synopsis),
        Report::Synopsis(synopsis) => serde_json::to_string_pretty(&synopsis)?,
        Report::Tree(tree) => serde_json::to_string_pretty(&tree)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let telemetry = telemetry::init(level, cli.log_json)?;
    let result = run(cli).await;
    telemetry.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("name-your-contributors").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn dates_and_timestamps_are_accepted() {
        assert_eq!(
            parse_time("2017-01-01").unwrap(),
            Timestamp::parse("2017-01-01T00:00:00Z").unwrap()
        );
        assert_eq!(
            parse_time("2016-01-15T00:20:24Z").unwrap(),
            Timestamp::parse("2016-01-15T00:20:24Z").unwrap()
        );
        assert!(parse_time("last tuesday").is_err());
    }

    #[test]
    fn user_and_repo_select_a_repository() {
        let cli = parse(&["-u", "ipfs", "-r", "go-ipfs", "-t", "x"]);
        match cli.target().unwrap() {
            Target::Repo(repo) => assert_eq!(repo.to_string(), "ipfs/go-ipfs"),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn organization_wins_over_user() {
        let cli = parse(&["-o", "ipfs", "-u", "someone"]);
        assert!(matches!(cli.target().unwrap(), Target::Org(org) if org.as_str() == "ipfs"));
    }

    #[test]
    fn nothing_to_search_is_an_error() {
        assert!(parse(&[]).target().is_err());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let cli = parse(&["-o", "ipfs", "-a", "2018-01-01", "-b", "2017-01-01"]);
        assert!(cli.window().is_err());
    }

    #[test]
    fn flags_override_engine_config() {
        let cli = parse(&["-o", "ipfs", "--no-cache", "--max-concurrent", "4"]);
        let config = cli.engine_config().unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.scheduler.max_concurrent, 4);
    }

    #[test]
    fn query_files_missing_arguments_fail_before_any_request() {
        let tmp = std::env::temp_dir().join(format!("nyc-query-{}.json", std::process::id()));
        std::fs::write(&tmp, r#"{"kind": "node", "name": "viewer", "children": ["login"]}"#).unwrap();
        let cli = parse(&["--query-file", tmp.to_str().unwrap()]);

        let err = cli.target().unwrap_err();
        std::fs::remove_file(&tmp).unwrap();

        assert!(format!("{err:#}").contains("No args passed to viewer"));
    }
}
