//! Run orchestration
//!
//! One run walks the configured sources in order. For each source it fetches a
//! batch, filters the posts oldest first, transfers media and publishes what
//! passed. Failures stay inside their source: they are logged, counted in the
//! [`RunSummary`] and the run moves on. State is saved once at the end and the
//! status dashboard written, whatever happened along the way.

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PublishMode, RateLimitAction};
use crate::error::FetchError;
use crate::fetcher::{Fetched, SourceFetcher};
use crate::filter::{FilterPipeline, Verdict};
use crate::media::MediaHandler;
use crate::platforms::{MediaSource, ReadApi, WriteApi};
use crate::publisher::Publisher;
use crate::report::{RunSummary, SourceStats, StatusDashboard};
use crate::state::StateStore;

pub struct RunController<'a> {
    config: &'a Config,
    fetcher: SourceFetcher<'a>,
    filter: FilterPipeline,
    media: MediaHandler<'a>,
    publisher: Publisher<'a>,
}

impl<'a> RunController<'a> {
    pub fn new(
        config: &'a Config,
        read: &'a dyn ReadApi,
        write: &'a dyn WriteApi,
        media_source: &'a dyn MediaSource,
    ) -> Self {
        Self {
            config,
            fetcher: SourceFetcher::new(read, config.retry.fetch.clone(), config.run.max_results),
            filter: FilterPipeline::new(&config.keywords, config.run.recency_window),
            media: MediaHandler::new(
                media_source,
                write,
                config.retry.download.clone(),
                config.retry.upload.clone(),
            ),
            publisher: Publisher::new(write, config.run.mode),
        }
    }

    /// Run the pipeline once over every source
    pub async fn run(&self, store: &mut StateStore) -> RunSummary {
        self.run_at(store, Utc::now()).await
    }

    /// Run with an explicit reference time for the recency window
    pub async fn run_at(&self, store: &mut StateStore, now: DateTime<Utc>) -> RunSummary {
        let sources = &self.config.sources;
        let mut summary = RunSummary::new(now, sources);
        info!("Starting run over {} sources", sources.len());

        for (index, source) in sources.iter().enumerate() {
            let mut stats = SourceStats::default();
            self.process_source(store, source, now, &mut stats).await;
            *summary.source_mut(source) = stats;

            let is_last = index + 1 == sources.len();
            if !is_last && !self.config.run.cooldown.is_zero() {
                sleep(self.config.run.cooldown).await;
            }
        }

        if let Err(e) = store.save() {
            error!("Failed to save state: {}", e);
        }

        summary.finish(Utc::now());
        info!(
            "Run finished: {} posted, {} skipped, {} errors, {} media dropped",
            summary.posted, summary.skipped, summary.errors, summary.media_dropped
        );

        if self.config.status.enabled {
            if let Err(e) = StatusDashboard::new(&self.config.status).write(&summary) {
                error!("Failed to write status dashboard: {}", e);
            }
        }

        summary
    }

    async fn process_source(
        &self,
        store: &mut StateStore,
        source: &str,
        now: DateTime<Utc>,
        stats: &mut SourceStats,
    ) {
        info!("Checking @{}", source);

        let fetched = match self.fetch_with_policy(store, source).await {
            Ok(fetched) => fetched,
            Err(e) => {
                if matches!(e, FetchError::SourceNotFound(_)) {
                    store.clear_account_id(source);
                }
                warn!("{}", e);
                stats.record_error(e.to_string());
                return;
            }
        };

        if fetched.looked_up {
            store.set_account_id(source, &fetched.account_id);
        }

        let batch = &fetched.batch;
        if batch.is_empty() {
            info!("No new posts from @{}", source);
            return;
        }

        for post in batch.posts_oldest_first() {
            if let Verdict::Skip(reason) = self.filter.check(post, store.state(), now) {
                debug!("Skipping {} from @{}: {}", post.id, source, reason);
                stats.record_skip(reason);
                continue;
            }

            let media_ids = match self.publisher.mode() {
                PublishMode::Post if !post.attachment_keys.is_empty() => {
                    let outcome = self.media.prepare(post, batch).await;
                    stats.media_dropped += outcome.dropped.len();
                    outcome.handles
                }
                _ => Vec::new(),
            };

            match self.publisher.publish(store, source, post, &media_ids).await {
                Ok(_) => stats.posted += 1,
                Err(e) => {
                    error!("{}", e);
                    stats.record_error(e.to_string());
                }
            }
        }

        if let Some(newest) = batch.newest_id() {
            store.advance_cursor(source, newest);
        }
    }

    /// Fetch a source, applying the rate-limit policy
    async fn fetch_with_policy(
        &self,
        store: &StateStore,
        source: &str,
    ) -> Result<Fetched, FetchError> {
        let cursor = store.cursor(source);
        let since_id = cursor.and_then(|c| c.last_seen_id.as_deref());
        let account_id = cursor.and_then(|c| c.account_id.as_deref());

        match self.fetcher.fetch(source, since_id, account_id).await {
            Err(e) if e.is_rate_limited() => match self.config.run.on_rate_limit {
                RateLimitAction::Skip => Err(e),
                RateLimitAction::Wait => {
                    let wait = self.config.run.rate_limit_sleep;
                    warn!(
                        "{}. Sleeping {} before retrying @{}",
                        e,
                        humantime::format_duration(wait),
                        source
                    );
                    sleep(wait).await;
                    self.fetcher.fetch(source, since_id, account_id).await
                }
            },
            other => other,
        }
    }
}
