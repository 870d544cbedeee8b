//! Scripted in-memory API implementations for testing
//!
//! Each mock records the calls it receives so tests can assert on what the
//! pipeline did, and can be told to fail in specific ways (rate limits,
//! missing accounts, flaky downloads, rejected publishes) without network
//! access or credentials.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::PlatformError;
use crate::platforms::{MediaSource, PlatformResult, ReadApi, WriteApi};
use crate::types::{compare_ids, Batch, MediaKind};

/// Lock, ignoring poisoning from an earlier panicking test
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded `recent_posts` call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub account_id: String,
    pub since_id: Option<String>,
    pub limit: usize,
}

#[derive(Default)]
struct ReadScript {
    accounts: HashMap<String, String>,
    lookup_errors: HashMap<String, PlatformError>,
    timelines: HashMap<String, Batch>,
    fetch_errors: HashMap<String, VecDeque<PlatformError>>,
    lookup_calls: Vec<String>,
    fetch_calls: Vec<FetchCall>,
}

/// Read API serving fixed timelines per account
///
/// Timelines honor `since_id` and `limit` the way the real service does:
/// only posts with a greater id are returned, newest first, capped at `limit`.
#[derive(Default)]
pub struct MockReadApi {
    script: Mutex<ReadScript>,
}

impl MockReadApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` as account `account_id` with the given timeline
    pub fn with_account(self, handle: &str, account_id: &str, timeline: Batch) -> Self {
        {
            let mut script = lock(&self.script);
            script
                .accounts
                .insert(handle.to_string(), account_id.to_string());
            script.timelines.insert(account_id.to_string(), timeline);
        }
        self
    }

    /// Make account lookups for `handle` fail
    pub fn with_lookup_error(self, handle: &str, error: PlatformError) -> Self {
        lock(&self.script)
            .lookup_errors
            .insert(handle.to_string(), error);
        self
    }

    /// Queue errors returned by the next timeline fetches for `account_id`,
    /// one per call, before the timeline is served again
    pub fn with_fetch_errors(self, account_id: &str, errors: Vec<PlatformError>) -> Self {
        lock(&self.script)
            .fetch_errors
            .insert(account_id.to_string(), errors.into());
        self
    }

    pub fn lookup_calls(&self) -> Vec<String> {
        lock(&self.script).lookup_calls.clone()
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        lock(&self.script).fetch_calls.clone()
    }
}

#[async_trait]
impl ReadApi for MockReadApi {
    async fn lookup_account(&self, handle: &str) -> PlatformResult<String> {
        let mut script = lock(&self.script);
        script.lookup_calls.push(handle.to_string());

        if let Some(error) = script.lookup_errors.get(handle) {
            return Err(error.clone());
        }
        script
            .accounts
            .get(handle)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("@{}: no such account", handle)))
    }

    async fn recent_posts(
        &self,
        account_id: &str,
        since_id: Option<&str>,
        limit: usize,
    ) -> PlatformResult<Batch> {
        let mut script = lock(&self.script);
        script.fetch_calls.push(FetchCall {
            account_id: account_id.to_string(),
            since_id: since_id.map(str::to_string),
            limit,
        });

        if let Some(error) = script
            .fetch_errors
            .get_mut(account_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let Some(timeline) = script.timelines.get(account_id) else {
            return Err(PlatformError::NotFound(format!("account {}", account_id)));
        };

        let mut posts: Vec<_> = timeline
            .posts
            .iter()
            .filter(|p| since_id.map_or(true, |since| compare_ids(&p.id, since).is_gt()))
            .cloned()
            .collect();
        posts.sort_by(|a, b| compare_ids(&b.id, &a.id));
        posts.truncate(limit);

        Ok(Batch {
            posts,
            attachments: timeline.attachments.clone(),
        })
    }
}

/// One recorded upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCall {
    pub kind: MediaKind,
    pub chunked: bool,
    pub size: usize,
}

/// One successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub id: String,
    pub text: String,
    pub media_ids: Vec<String>,
}

#[derive(Default)]
struct WriteScript {
    next_id: u64,
    published: Vec<Published>,
    reshared: Vec<String>,
    uploads: Vec<UploadCall>,
    publish_attempts: usize,
    upload_error: Option<PlatformError>,
    publish_failures: Vec<(String, PlatformError)>,
}

/// Write API that records published posts and hands out sequential ids
pub struct MockWriteApi {
    script: Mutex<WriteScript>,
}

impl Default for MockWriteApi {
    fn default() -> Self {
        Self {
            script: Mutex::new(WriteScript {
                next_id: 9000,
                ..Default::default()
            }),
        }
    }
}

impl MockWriteApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upload with `error`
    pub fn failing_uploads(self, error: PlatformError) -> Self {
        lock(&self.script).upload_error = Some(error);
        self
    }

    /// Reject publishes (and re-shares) whose text or post id contains `needle`
    pub fn failing_publish_containing(self, needle: &str, error: PlatformError) -> Self {
        lock(&self.script)
            .publish_failures
            .push((needle.to_string(), error));
        self
    }

    pub fn published(&self) -> Vec<Published> {
        lock(&self.script).published.clone()
    }

    pub fn published_texts(&self) -> Vec<String> {
        self.published().into_iter().map(|p| p.text).collect()
    }

    pub fn reshared(&self) -> Vec<String> {
        lock(&self.script).reshared.clone()
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        lock(&self.script).uploads.clone()
    }

    /// Publish and re-share calls, including rejected ones
    pub fn publish_attempts(&self) -> usize {
        lock(&self.script).publish_attempts
    }
}

impl WriteScript {
    fn rejection_for(&self, subject: &str) -> Option<PlatformError> {
        self.publish_failures
            .iter()
            .find(|(needle, _)| subject.contains(needle.as_str()))
            .map(|(_, error)| error.clone())
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

#[async_trait]
impl WriteApi for MockWriteApi {
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        kind: MediaKind,
        chunked: bool,
    ) -> PlatformResult<String> {
        let mut script = lock(&self.script);
        script.uploads.push(UploadCall {
            kind,
            chunked,
            size: bytes.len(),
        });
        if let Some(error) = &script.upload_error {
            return Err(error.clone());
        }
        Ok(format!("media-{}", script.allocate_id()))
    }

    async fn publish(&self, text: &str, media_ids: &[String]) -> PlatformResult<String> {
        let mut script = lock(&self.script);
        script.publish_attempts += 1;
        if let Some(error) = script.rejection_for(text) {
            return Err(error);
        }

        let id = script.allocate_id();
        script.published.push(Published {
            id: id.clone(),
            text: text.to_string(),
            media_ids: media_ids.to_vec(),
        });
        Ok(id)
    }

    async fn reshare(&self, post_id: &str) -> PlatformResult<()> {
        let mut script = lock(&self.script);
        script.publish_attempts += 1;
        if let Some(error) = script.rejection_for(post_id) {
            return Err(error);
        }
        script.reshared.push(post_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MediaScript {
    files: HashMap<String, Vec<u8>>,
    failures_left: HashMap<String, u32>,
    calls: HashMap<String, u32>,
}

/// Serves attachment bytes by URL
#[derive(Default)]
pub struct MockMediaSource {
    script: Mutex<MediaScript>,
}

impl MockMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, url: &str, bytes: Vec<u8>) -> Self {
        lock(&self.script)
            .files
            .insert(url.to_string(), bytes);
        self
    }

    /// Serve `bytes` at `url` after `failures` transient network errors
    pub fn with_flaky_file(self, url: &str, failures: u32, bytes: Vec<u8>) -> Self {
        {
            let mut script = lock(&self.script);
            script.files.insert(url.to_string(), bytes);
            script.failures_left.insert(url.to_string(), failures);
        }
        self
    }

    pub fn calls_for(&self, url: &str) -> u32 {
        lock(&self.script)
            .calls
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn fetch_bytes(&self, url: &str) -> PlatformResult<Vec<u8>> {
        let mut script = lock(&self.script);
        *script.calls.entry(url.to_string()).or_insert(0) += 1;

        if let Some(left) = script.failures_left.get_mut(url) {
            if *left > 0 {
                *left -= 1;
                return Err(PlatformError::Network(format!("connection reset fetching {}", url)));
            }
        }
        script
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Post;
    use chrono::Utc;

    fn timeline(ids: &[&str]) -> Batch {
        Batch {
            posts: ids
                .iter()
                .map(|id| Post::new(*id, format!("post {}", id), Utc::now()))
                .collect(),
            attachments: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_read_honors_since_id_and_limit() {
        let api = MockReadApi::new().with_account("src", "1", timeline(&["5", "12", "9", "7"]));

        let batch = api.recent_posts("1", Some("6"), 2).await.unwrap();
        let ids: Vec<&str> = batch.posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["12", "9"]);

        assert_eq!(
            api.fetch_calls(),
            vec![FetchCall {
                account_id: "1".into(),
                since_id: Some("6".into()),
                limit: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_read_unknown_handle_is_not_found() {
        let api = MockReadApi::new();
        let err = api.lookup_account("ghost").await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
        assert_eq!(api.lookup_calls(), vec!["ghost"]);
    }

    #[tokio::test]
    async fn test_queued_fetch_errors_are_consumed_in_order() {
        let api = MockReadApi::new()
            .with_account("src", "1", timeline(&["3"]))
            .with_fetch_errors("1", vec![PlatformError::RateLimit("slow down".into())]);

        assert!(matches!(
            api.recent_posts("1", None, 10).await,
            Err(PlatformError::RateLimit(_))
        ));
        assert_eq!(api.recent_posts("1", None, 10).await.unwrap().posts.len(), 1);
    }

    #[tokio::test]
    async fn test_write_records_and_rejects() {
        let api = MockWriteApi::new()
            .failing_publish_containing("forbidden", PlatformError::Authentication("no".into()));

        let id = api.publish("hello", &[]).await.unwrap();
        assert_eq!(id, "9001");
        assert!(api.publish("forbidden words", &[]).await.is_err());

        assert_eq!(api.published_texts(), vec!["hello"]);
        assert_eq!(api.publish_attempts(), 2);
    }

    #[tokio::test]
    async fn test_flaky_media_recovers() {
        let media = MockMediaSource::new().with_flaky_file("u", 2, vec![1, 2]);
        assert!(media.fetch_bytes("u").await.is_err());
        assert!(media.fetch_bytes("u").await.is_err());
        assert_eq!(media.fetch_bytes("u").await.unwrap(), vec![1, 2]);
        assert_eq!(media.calls_for("u"), 3);
    }
}
