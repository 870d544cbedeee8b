//! Core types for newsrelay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A post fetched from a source account. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Keys into the batch's attachment index
    #[serde(default)]
    pub attachment_keys: Vec<String>,
}

impl Post {
    pub fn new(id: impl Into<String>, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at,
            attachment_keys: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, keys: Vec<String>) -> Self {
        self.attachment_keys = keys;
        self
    }
}

// ============================================================================
// Attachment Types
// ============================================================================

/// Kind of media referenced by a post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

impl MediaKind {
    /// Parse the API's media `type` field
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "animated_gif" => Some(Self::AnimatedGif),
            _ => None,
        }
    }

    /// Video and animated media go through the chunked upload path
    pub fn is_chunked(&self) -> bool {
        !matches!(self, Self::Photo)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Photo => "image/jpeg",
            Self::Video | Self::AnimatedGif => "video/mp4",
        }
    }

    /// Upload category understood by the chunked upload endpoint
    pub fn media_category(&self) -> &'static str {
        match self {
            Self::Photo => "tweet_image",
            Self::Video => "tweet_video",
            Self::AnimatedGif => "tweet_gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video | Self::AnimatedGif => "mp4",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Photo => write!(f, "photo"),
            Self::Video => write!(f, "video"),
            Self::AnimatedGif => write!(f, "animated_gif"),
        }
    }
}

/// Media descriptor resolved from a batch's attachment index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: String,
    pub kind: MediaKind,
    /// Absent when the API did not expose a downloadable URL
    pub url: Option<String>,
}

/// Result of one fetch: the posts plus the attachments they reference
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub posts: Vec<Post>,
    pub attachments: HashMap<String, Attachment>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn attachment(&self, key: &str) -> Option<&Attachment> {
        self.attachments.get(key)
    }

    /// Posts in publish order (oldest identifier first)
    pub fn posts_oldest_first(&self) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self.posts.iter().collect();
        posts.sort_by(|a, b| compare_ids(&a.id, &b.id));
        posts
    }

    /// Greatest post identifier in the batch
    pub fn newest_id(&self) -> Option<&str> {
        self.posts
            .iter()
            .map(|p| p.id.as_str())
            .max_by(|a, b| compare_ids(a, b))
    }
}

/// Order post identifiers numerically without parsing them.
///
/// Identifiers are decimal strings of arbitrary length; a longer string is the
/// larger number.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
