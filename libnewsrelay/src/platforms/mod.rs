//! External API collaborators
//!
//! The pipeline talks to one external service through three narrow traits:
//! [`ReadApi`] to look up accounts and fetch their recent posts, [`WriteApi`] to
//! upload media and publish, and [`MediaSource`] to download attachment bytes.
//! [`x::XClient`] implements all three over HTTP; [`mock`] provides scripted
//! in-memory implementations for tests.
//!
//! # Examples
//!
//! ```no_run
//! use libnewsrelay::config::{ApiConfig, Credentials};
//! use libnewsrelay::platforms::{x::XClient, ReadApi};
//!
//! # async fn example() -> libnewsrelay::error::Result<()> {
//! let client = XClient::new(&ApiConfig::default(), Credentials::from_env()?)?;
//! let account_id = client.lookup_account("acehinfo").await?;
//! let batch = client.recent_posts(&account_id, None, 10).await?;
//! println!("fetched {} posts", batch.posts.len());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{Batch, MediaKind};

pub mod mock;
pub mod oauth;
pub mod x;

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Read side of the external API
#[async_trait]
pub trait ReadApi: Send + Sync {
    /// Resolve an account handle to the API's account identifier
    ///
    /// # Errors
    ///
    /// `PlatformError::NotFound` for unknown or suspended accounts,
    /// `PlatformError::RateLimit` when the lookup is throttled.
    async fn lookup_account(&self, handle: &str) -> PlatformResult<String>;

    /// Fetch at most `limit` recent posts, newer than `since_id` when given,
    /// together with the attachment index for the batch
    async fn recent_posts(
        &self,
        account_id: &str,
        since_id: Option<&str>,
        limit: usize,
    ) -> PlatformResult<Batch>;
}

/// Write side of the external API
#[async_trait]
pub trait WriteApi: Send + Sync {
    /// Upload media bytes and return the media handle.
    ///
    /// `chunked` selects the segmented upload path required for video and
    /// animated media.
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        kind: MediaKind,
        chunked: bool,
    ) -> PlatformResult<String>;

    /// Publish a post and return its new identifier
    async fn publish(&self, text: &str, media_ids: &[String]) -> PlatformResult<String>;

    /// Re-share an existing post
    async fn reshare(&self, post_id: &str) -> PlatformResult<()>;
}

/// Downloads attachment bytes
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> PlatformResult<Vec<u8>>;
}
