//! Composing and publishing accepted posts

use tracing::{error, info};

use crate::config::PublishMode;
use crate::error::PublishError;
use crate::platforms::WriteApi;
use crate::state::StateStore;
use crate::types::Post;

/// Character limit of a published post
pub const MAX_POST_CHARS: usize = 280;
const ELLIPSIS: &str = "...";

/// Attribution appended to every composed post
pub fn source_suffix(source: &str) -> String {
    format!("\n\nSource: @{}", source)
}

/// Build the final post text.
///
/// Whitespace runs collapse to single spaces. When the body and suffix would
/// exceed [`MAX_POST_CHARS`] the body is cut and ends in `...`. Lengths are
/// counted in characters, not bytes.
pub fn compose(text: &str, source: &str) -> String {
    let body = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let suffix = source_suffix(source);
    let suffix_len = suffix.chars().count();

    if body.chars().count() + suffix_len <= MAX_POST_CHARS {
        return body + &suffix;
    }

    let keep = MAX_POST_CHARS
        .saturating_sub(suffix_len)
        .saturating_sub(ELLIPSIS.len());
    let mut composed: String = body.chars().take(keep).collect();
    composed.push_str(ELLIPSIS);
    composed.push_str(&suffix);
    composed
}

/// What a successful publish produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishReceipt {
    Posted { new_id: String },
    Reshared,
}

pub struct Publisher<'a> {
    writer: &'a dyn WriteApi,
    mode: PublishMode,
}

impl<'a> Publisher<'a> {
    pub fn new(writer: &'a dyn WriteApi, mode: PublishMode) -> Self {
        Self { writer, mode }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Publish `post` from `source` and record it as published.
    ///
    /// The id goes into the store right after the API accepts the post, so a
    /// crash later in the run cannot cause it to be published again. A failed
    /// ledger append is logged; the id stays in memory and is written at the
    /// end-of-run save.
    pub async fn publish(
        &self,
        store: &mut StateStore,
        source: &str,
        post: &Post,
        media_ids: &[String],
    ) -> Result<PublishReceipt, PublishError> {
        let receipt = match self.mode {
            PublishMode::Post => {
                let text = compose(&post.text, source);
                let new_id = self
                    .writer
                    .publish(&text, media_ids)
                    .await
                    .map_err(|e| failed(post, e))?;
                info!(
                    "Published {} from @{} as {} ({} media)",
                    post.id,
                    source,
                    new_id,
                    media_ids.len()
                );
                PublishReceipt::Posted { new_id }
            }
            PublishMode::Reshare => {
                self.writer
                    .reshare(&post.id)
                    .await
                    .map_err(|e| failed(post, e))?;
                info!("Re-shared {} from @{}", post.id, source);
                PublishReceipt::Reshared
            }
        };

        if let Err(e) = store.record(source, &post.id) {
            error!("Failed to append {} to the published ledger: {}", post.id, e);
        }
        Ok(receipt)
    }
}

fn failed(post: &Post, error: crate::error::PlatformError) -> PublishError {
    PublishError::PublishFailed {
        post_id: post.id.clone(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platforms::mock::MockWriteApi;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::open(dir.path().join("posted_ids.txt"), dir.path().join("last_seen.json"))
    }

    #[test]
    fn test_compose_short_text() {
        assert_eq!(
            compose("Banjir   di\n\tAceh Utara ", "acehinfo"),
            "Banjir di Aceh Utara\n\nSource: @acehinfo"
        );
    }

    #[test]
    fn test_compose_truncates_long_text() {
        let text = "a".repeat(300);
        let composed = compose(&text, "demo");

        assert_eq!(composed.chars().count(), 280);
        assert!(composed.ends_with("...\n\nSource: @demo"));
        assert!(composed.starts_with(&"a".repeat(262)));
    }

    #[test]
    fn test_compose_exact_fit_is_not_truncated() {
        let suffix_len = source_suffix("demo").chars().count();
        let text = "b".repeat(MAX_POST_CHARS - suffix_len);
        let composed = compose(&text, "demo");
        assert_eq!(composed.chars().count(), MAX_POST_CHARS);
        assert!(!composed.contains(ELLIPSIS));
    }

    #[test]
    fn test_compose_counts_characters() {
        let text = "é".repeat(400);
        let composed = compose(&text, "kompascom");
        assert_eq!(composed.chars().count(), MAX_POST_CHARS);
        assert!(composed.ends_with("Source: @kompascom"));
    }

    #[test]
    fn test_compose_never_exceeds_limit() {
        for len in [0, 1, 100, 264, 265, 266, 279, 280, 281, 1000] {
            let composed = compose(&"x ".repeat(len), "SerambiNews");
            assert!(composed.chars().count() <= MAX_POST_CHARS, "len {}", len);
            assert!(composed.ends_with("Source: @SerambiNews"));
        }
    }

    #[tokio::test]
    async fn test_publish_records_immediately() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let writer = MockWriteApi::new();
        let publisher = Publisher::new(&writer, PublishMode::Post);
        let post = Post::new("1001", "Gempa Aceh", Utc::now());

        let receipt = publisher
            .publish(&mut store, "acehinfo", &post, &["media-1".to_string()])
            .await
            .unwrap();
        assert_eq!(receipt, PublishReceipt::Posted { new_id: "9001".into() });
        assert!(store.is_published("1001"));

        // Ledger is on disk without an explicit save
        let reloaded = store_in(&dir);
        assert!(reloaded.is_published("1001"));
        assert_eq!(writer.published()[0].media_ids, vec!["media-1"]);
    }

    #[tokio::test]
    async fn test_publish_failure_records_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let writer = MockWriteApi::new()
            .failing_publish_containing("Gempa", PlatformError::Api {
                status: 403,
                message: "duplicate".into(),
            });
        let publisher = Publisher::new(&writer, PublishMode::Post);
        let post = Post::new("1002", "Gempa Aceh", Utc::now());

        let err = publisher
            .publish(&mut store, "acehinfo", &post, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::PublishFailed { ref post_id, .. } if post_id == "1002"));
        assert!(!store.is_published("1002"));
    }

    #[tokio::test]
    async fn test_reshare_mode() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let writer = MockWriteApi::new();
        let publisher = Publisher::new(&writer, PublishMode::Reshare);
        let post = Post::new("1003", "Aceh", Utc::now());

        let receipt = publisher.publish(&mut store, "acehinfo", &post, &[]).await.unwrap();
        assert_eq!(receipt, PublishReceipt::Reshared);
        assert_eq!(writer.reshared(), vec!["1003"]);
        assert!(writer.published().is_empty());
        assert!(store.is_published("1003"));
    }
}
