//! Attachment transfer
//!
//! Downloads each attachment of an accepted post and re-uploads it through the
//! write API. Failures only drop the affected attachment; the post is still
//! published with whatever media made it through.

use tracing::{debug, info, warn};

use crate::error::MediaError;
use crate::platforms::{MediaSource, WriteApi};
use crate::retry::RetryPolicy;
use crate::types::{Batch, MediaKind, Post};

/// Media handles ready to attach, plus what could not be carried over
#[derive(Debug, Default)]
pub struct MediaOutcome {
    pub handles: Vec<String>,
    /// Attachments that failed to download or upload
    pub dropped: Vec<MediaError>,
    /// Keys with no entry in the batch index or no downloadable URL
    pub skipped: Vec<String>,
}

pub struct MediaHandler<'a> {
    source: &'a dyn MediaSource,
    writer: &'a dyn WriteApi,
    download_retry: RetryPolicy,
    upload_retry: RetryPolicy,
}

impl<'a> MediaHandler<'a> {
    pub fn new(
        source: &'a dyn MediaSource,
        writer: &'a dyn WriteApi,
        download_retry: RetryPolicy,
        upload_retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            writer,
            download_retry,
            upload_retry,
        }
    }

    /// Transfer every attachment referenced by `post`, in reference order
    pub async fn prepare(&self, post: &Post, batch: &Batch) -> MediaOutcome {
        let mut outcome = MediaOutcome::default();

        for key in &post.attachment_keys {
            let Some(attachment) = batch.attachment(key) else {
                debug!("Post {} references unknown media {}", post.id, key);
                outcome.skipped.push(key.clone());
                continue;
            };
            let Some(url) = attachment.url.as_deref() else {
                debug!("{}", MediaError::MissingUrl(key.clone()));
                outcome.skipped.push(key.clone());
                continue;
            };

            let transferred = match self.fetch_bytes(key, url).await {
                Ok(bytes) => self.upload(key, bytes, attachment.kind).await,
                Err(e) => Err(e),
            };
            match transferred {
                Ok(handle) => outcome.handles.push(handle),
                Err(e) => {
                    warn!("Dropping attachment of post {}: {}", post.id, e);
                    outcome.dropped.push(e);
                }
            }
        }

        outcome
    }

    /// Download with the download retry policy
    pub async fn fetch_bytes(&self, key: &str, url: &str) -> Result<Vec<u8>, MediaError> {
        self.download_retry
            .run(&format!("download {}", key), || self.source.fetch_bytes(url))
            .await
            .map_err(|e| MediaError::DownloadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Upload with the upload retry policy; video and animated kinds go chunked
    pub async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        kind: MediaKind,
    ) -> Result<String, MediaError> {
        let chunked = kind.is_chunked();
        let handle = self
            .upload_retry
            .run(&format!("upload {}", key), || {
                self.writer.upload_media(bytes.clone(), kind, chunked)
            })
            .await
            .map_err(|e| MediaError::UploadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        info!("Uploaded {} {} as media {}", kind, key, handle);
        Ok(handle)
    }
}
