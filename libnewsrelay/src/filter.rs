//! Post filtering
//!
//! Three predicates run in a fixed order and stop at the first rejection:
//! already published, older than the recency window, no keyword in the text.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::state::SeenState;
use crate::types::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    Stale,
    NoMatch,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Duplicate => write!(f, "duplicate"),
            SkipReason::Stale => write!(f, "stale"),
            SkipReason::NoMatch => write!(f, "no match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Skip(SkipReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

#[derive(Debug, Clone)]
pub struct FilterPipeline {
    keywords: Vec<String>,
    window: ChronoDuration,
}

impl FilterPipeline {
    /// Keywords are lower-cased once here; blank keywords are ignored
    pub fn new(keywords: &[String], recency_window: Duration) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let window = ChronoDuration::from_std(recency_window).unwrap_or(ChronoDuration::MAX);
        Self { keywords, window }
    }

    /// Evaluate `post` against `seen` as of `now`
    pub fn check(&self, post: &Post, seen: &SeenState, now: DateTime<Utc>) -> Verdict {
        if seen.is_published(&post.id) {
            return Verdict::Skip(SkipReason::Duplicate);
        }
        if !self.is_recent(post, now) {
            return Verdict::Skip(SkipReason::Stale);
        }
        if !self.matches_keyword(&post.text) {
            return Verdict::Skip(SkipReason::NoMatch);
        }
        Verdict::Accept
    }

    pub fn is_recent(&self, post: &Post, now: DateTime<Utc>) -> bool {
        match now.checked_sub_signed(self.window) {
            Some(cutoff) => post.created_at >= cutoff,
            None => true,
        }
    }

    pub fn matches_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}
