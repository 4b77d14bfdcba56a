//! Runtime configuration for the GitHub infrastructure.
//!
//! All types deserialize with per-field defaults, so a partial document (or
//! none at all) yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The public GitHub GraphQL endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.github.com/graphql";

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// GraphQL endpoint URL.
    pub endpoint: String,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Page size requested by continuation queries.
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: "Name-Your-Contributors".to_string(),
            page_size: 100,
        }
    }
}

/// Admission limits of the request scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of requests in flight at once.
    pub max_concurrent: usize,
    /// Maximum admissions within one rolling `window`.
    pub max_per_minute: usize,
    /// Length of the rolling admission window.
    pub window: Duration,
    /// Cap on throttled attempts of a single request. `None` retries for as
    /// long as the provider keeps throttling.
    pub max_backoff_retries: Option<u32>,
    /// Wait used when the provider signals throttling but omits the header
    /// carrying its timing (`retry-after` or `x-ratelimit-reset`).
    pub fallback_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            max_per_minute: 300,
            window: Duration::from_secs(60),
            max_backoff_retries: None,
            fallback_wait: Duration::from_secs(60),
        }
    }
}

/// On-disk response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether responses are cached at all.
    pub enabled: bool,
    /// Directory holding one file per cached response.
    pub dir: PathBuf,
    /// Entry lifetime. Reads never extend it.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// HTTP transport.
    pub client: ClientConfig,
    /// Admission limits.
    pub scheduler: SchedulerConfig,
    /// Response cache.
    pub cache: CacheConfig,
}

/// `<user cache dir>/name-your-contributors`, falling back to the home
/// directory and finally the working directory.
pub fn default_cache_dir() -> PathBuf {
    if let Some(cache) = dirs::cache_dir() {
        cache.join("name-your-contributors")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".name-your-contributors").join("cache")
    } else {
        PathBuf::from(".name-your-contributors-cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"max_concurrent": 4}"#).unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.max_per_minute, 300);
        assert_eq!(config.max_backoff_retries, None);
    }

    #[test]
    fn nested_sections_default_independently() {
        let config: GithubConfig =
            serde_json::from_str(r#"{"client": {"page_size": 50}, "cache": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(config.client.page_size, 50);
        assert_eq!(config.client.endpoint, DEFAULT_ENDPOINT);
        assert!(!config.cache.enabled);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn cache_defaults_to_one_day() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl, Duration::from_secs(86_400));
        assert!(!config.dir.as_os_str().is_empty());
    }
}
