//! Newsrelay - keyword-filtered republishing of regional news
//!
//! Polls a fixed list of accounts, keeps the recent posts that mention one of
//! the configured keywords, and republishes them with source attribution,
//! re-uploading attached media. Published identifiers are persisted so a post
//! is never republished across runs.

pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod publisher;
pub mod report;
pub mod retry;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::{Config, Credentials};
pub use controller::RunController;
pub use error::{RelayError, Result};
pub use report::{RunSummary, SourceStats};
pub use state::{SeenState, StateStore};
pub use types::{Attachment, Batch, MediaKind, Post};
