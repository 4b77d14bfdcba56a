//! Cached GraphQL client: cache first, scheduler on a miss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contributors::{QueryCost, QueryNode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, DiskCache};
use crate::errors::ClientError;
use crate::request::{RequestEnvelope, RequestFlags, Token};
use crate::scheduler::Scheduler;

/// A response and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// The full response body (`{"data": ...}`).
    pub body: Value,
    /// `true` when served from the cache without touching the network.
    pub cache_hit: bool,
}

impl Execution {
    /// The `data` member of the response.
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    /// The quota report the cost wrapper asked for, if present.
    pub fn cost(&self) -> Option<QueryCost> {
        serde_json::from_value(self.data().get("rateLimit")?.clone()).ok()
    }
}

/// Executes query trees through the cache and the scheduler.
#[derive(Clone)]
pub struct GraphqlClient {
    scheduler: Scheduler,
    cache: Option<DiskCache>,
    token: Option<Token>,
    flags: RequestFlags,
    requests: Arc<AtomicU64>,
}

impl std::fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlClient")
            .field("cache", &self.cache)
            .field("token", &self.token)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl GraphqlClient {
    /// Builds a client. `cache: None` disables caching; `token: None` makes
    /// every execution fail with [`ClientError::MissingToken`].
    pub fn new(
        scheduler: Scheduler,
        cache: Option<DiskCache>,
        token: Option<Token>,
        flags: RequestFlags,
    ) -> Self {
        Self {
            scheduler,
            cache,
            token,
            flags,
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Logging and dry-run flags applied to every request.
    pub fn flags(&self) -> RequestFlags {
        self.flags
    }

    /// Number of executions so far, cache hits included.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Executes `query`. `name` labels the request in logs.
    pub async fn execute(&self, query: &QueryNode, name: &str) -> Result<Execution, ClientError> {
        let token = self.token.clone().ok_or(ClientError::MissingToken)?;
        let envelope = RequestEnvelope::new(token, query, name, self.flags);
        let key = CacheKey::new(&envelope.query_text, self.flags.dry_run);
        if self.flags.debug {
            debug!(label = name, query = %envelope.operation(), "sending query");
        }

        let cached = match &self.cache {
            Some(cache) => match cache.get(&key).await {
                Ok(hit) => hit,
                Err(err) => {
                    warn!(label = name, error = %err, "cache read failed; treating as a miss");
                    None
                }
            },
            None => None,
        };

        let execution = match cached {
            Some(body) => Execution {
                body,
                cache_hit: true,
            },
            None => {
                let body = self.scheduler.submit(envelope).await?;
                if let Some(cache) = &self.cache {
                    cache.put(key, body.clone());
                }
                Execution {
                    body,
                    cache_hit: false,
                }
            }
        };

        let number = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.log_cost(name, number, &execution);
        Ok(execution)
    }

    fn log_cost(&self, name: &str, number: u64, execution: &Execution) {
        let cost = execution.cost();
        let (cost, remaining, reset_at) = match &cost {
            Some(c) => (c.cost, c.remaining, c.reset_at.map(|t| t.to_string())),
            None => (0, 0, None),
        };
        if self.flags.verbose {
            info!(
                label = name,
                request = number,
                cost,
                remaining,
                reset_at = reset_at.as_deref().unwrap_or("unknown"),
                cache_hit = execution.cache_hit,
                "query cost"
            );
        } else {
            debug!(label = name, request = number, cost, remaining, cache_hit = execution.cache_hit, "query cost");
        }
        if self.flags.debug {
            debug!(label = name, result = %execution.body, "query result");
        }
    }

    /// Waits for the scheduler to drain, then for pending cache writes.
    pub async fn shutdown(&self) {
        self.scheduler.close().await;
        if let Some(cache) = &self.cache {
            cache.flush().await;
        }
    }
}
