//! Source fetching
//!
//! Resolves a source handle to its account and pulls a bounded batch of recent
//! posts. Platform failures are classified into [`FetchError`] here; rate
//! limits are never retried inside the fetcher, the run controller decides
//! whether to back off.

use tracing::{debug, info};

use crate::config::MAX_RESULTS_PER_SOURCE;
use crate::error::{FetchError, PlatformError};
use crate::platforms::ReadApi;
use crate::retry::RetryPolicy;
use crate::types::Batch;

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Account identifier used for the timeline call
    pub account_id: String,
    /// Whether `account_id` came from a fresh lookup rather than the cache
    pub looked_up: bool,
    pub batch: Batch,
}

pub struct SourceFetcher<'a> {
    api: &'a dyn ReadApi,
    retry: RetryPolicy,
    limit: usize,
}

impl<'a> SourceFetcher<'a> {
    /// `limit` is clamped to `1..=MAX_RESULTS_PER_SOURCE`
    pub fn new(api: &'a dyn ReadApi, retry: RetryPolicy, limit: usize) -> Self {
        Self {
            api,
            retry,
            limit: limit.clamp(1, MAX_RESULTS_PER_SOURCE),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Fetch recent posts of `source` newer than `since_id`.
    ///
    /// `cached_account` skips the handle lookup when present.
    ///
    /// # Errors
    ///
    /// - `FetchError::SourceNotFound` for unknown or suspended accounts
    /// - `FetchError::RateLimited` when either call is throttled; no partial
    ///   result is returned
    /// - `FetchError::FetchFailed` for everything else
    pub async fn fetch(
        &self,
        source: &str,
        since_id: Option<&str>,
        cached_account: Option<&str>,
    ) -> Result<Fetched, FetchError> {
        let (account_id, looked_up) = match cached_account {
            Some(id) => (id.to_string(), false),
            None => {
                let id = self
                    .retry
                    .run_when(&format!("lookup @{}", source), retry_in_fetch, || {
                        self.api.lookup_account(source)
                    })
                    .await
                    .map_err(|e| FetchError::from_platform(source, e))?;
                info!("Resolved @{} to account {}", source, id);
                (id, true)
            }
        };

        let batch = self
            .retry
            .run_when(&format!("fetch @{}", source), retry_in_fetch, || {
                self.api.recent_posts(&account_id, since_id, self.limit)
            })
            .await
            .map_err(|e| FetchError::from_platform(source, e))?;

        debug!(
            "Fetched {} posts ({} attachments) from @{} since {:?}",
            batch.posts.len(),
            batch.attachments.len(),
            source,
            since_id
        );

        Ok(Fetched {
            account_id,
            looked_up,
            batch,
        })
    }
}

fn retry_in_fetch(error: &PlatformError) -> bool {
    error.is_retryable() && !matches!(error, PlatformError::RateLimit(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockReadApi;
    use crate::types::Post;
    use chrono::Utc;
    use std::collections::HashMap;

    fn timeline(ids: &[&str]) -> Batch {
        Batch {
            posts: ids
                .iter()
                .map(|id| Post::new(*id, "Aceh", Utc::now()))
                .collect(),
            attachments: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_fetch_looks_up_then_reads() {
        let api = MockReadApi::new().with_account("acehinfo", "42", timeline(&["1", "2"]));
        let fetcher = SourceFetcher::new(&api, RetryPolicy::none(), 10);

        let fetched = fetcher.fetch("acehinfo", None, None).await.unwrap();
        assert_eq!(fetched.account_id, "42");
        assert!(fetched.looked_up);
        assert_eq!(fetched.batch.posts.len(), 2);
        assert_eq!(api.lookup_calls(), vec!["acehinfo"]);
    }

    #[tokio::test]
    async fn test_cached_account_skips_lookup() {
        let api = MockReadApi::new().with_account("acehinfo", "42", timeline(&["1"]));
        let fetcher = SourceFetcher::new(&api, RetryPolicy::none(), 10);

        let fetched = fetcher.fetch("acehinfo", Some("0"), Some("42")).await.unwrap();
        assert!(!fetched.looked_up);
        assert!(api.lookup_calls().is_empty());
        assert_eq!(api.fetch_calls()[0].since_id.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let api = MockReadApi::new().with_account("a", "1", timeline(&[]));
        assert_eq!(SourceFetcher::new(&api, RetryPolicy::none(), 50).limit(), 10);
        assert_eq!(SourceFetcher::new(&api, RetryPolicy::none(), 0).limit(), 1);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let api = MockReadApi::new();
        let fetcher = SourceFetcher::new(&api, RetryPolicy::none(), 10);
        let err = fetcher.fetch("ghost", None, None).await.unwrap_err();
        assert_eq!(err, FetchError::SourceNotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let api = MockReadApi::new()
            .with_account("busy", "7", timeline(&["1"]))
            .with_fetch_errors("7", vec![PlatformError::RateLimit("429".into())]);
        let fetcher = SourceFetcher::new(&api, RetryPolicy::immediate(3), 10);

        let err = fetcher.fetch("busy", None, Some("7")).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(api.fetch_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_by_policy() {
        let api = MockReadApi::new()
            .with_account("flaky", "8", timeline(&["1"]))
            .with_fetch_errors("8", vec![PlatformError::Network("reset".into())]);

        let single = SourceFetcher::new(&api, RetryPolicy::none(), 10);
        let err = single.fetch("flaky", None, Some("8")).await.unwrap_err();
        assert!(matches!(err, FetchError::FetchFailed { .. }));

        let api = MockReadApi::new()
            .with_account("flaky", "8", timeline(&["1"]))
            .with_fetch_errors("8", vec![PlatformError::Network("reset".into())]);
        let retrying = SourceFetcher::new(&api, RetryPolicy::immediate(2), 10);
        assert!(retrying.fetch("flaky", None, Some("8")).await.is_ok());
    }
}
