//! Error types for newsrelay
//!
//! Errors are layered the way the pipeline is: a single external call fails with a
//! [`PlatformError`], and each component maps that into its own kind
//! ([`FetchError`], [`MediaError`], [`PublishError`]) so the run controller can
//! decide between skipping, backing off, or dropping an attachment.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl RelayError {
    /// Returns the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Config(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of a single failed call to the external API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Whether repeating the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Network(_) | PlatformError::RateLimit(_) | PlatformError::Decode(_) => {
                true
            }
            PlatformError::Api { status, .. } => *status >= 500,
            PlatformError::Authentication(_) | PlatformError::NotFound(_) => false,
        }
    }
}

/// Per-source fetch failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Source @{0} not found or suspended")]
    SourceNotFound(String),

    #[error("Rate limited while fetching @{handle}: {message}")]
    RateLimited { handle: String, message: String },

    #[error("Fetch failed for @{handle}: {message}")]
    FetchFailed { handle: String, message: String },
}

impl FetchError {
    /// Classify a platform failure for the given source
    pub fn from_platform(source: &str, error: PlatformError) -> Self {
        match error {
            PlatformError::NotFound(_) => FetchError::SourceNotFound(source.to_string()),
            PlatformError::RateLimit(message) => FetchError::RateLimited {
                handle: source.to_string(),
                message,
            },
            other => FetchError::FetchFailed {
                handle: source.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

/// Per-attachment failures; the post is still published without the media
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("Media download failed for {key}: {message}")]
    DownloadFailed { key: String, message: String },

    #[error("Media upload failed for {key}: {message}")]
    UploadFailed { key: String, message: String },

    #[error("Attachment {0} has no downloadable URL")]
    MissingUrl(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Publishing post {post_id} failed: {message}")]
    PublishFailed { post_id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let error = RelayError::Config(ConfigError::MissingCredential("X_API_KEY".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_runtime_errors() {
        let fetch = RelayError::Fetch(FetchError::SourceNotFound("ghost".to_string()));
        assert_eq!(fetch.exit_code(), 1);

        let state = RelayError::State(StateError::Io {
            path: "posted_ids.txt".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(state.exit_code(), 1);
    }

    #[test]
    fn test_missing_credential_message_names_variable() {
        let error = ConfigError::MissingCredential("X_BEARER_TOKEN".to_string());
        assert_eq!(
            error.to_string(),
            "Missing credential: environment variable X_BEARER_TOKEN is not set"
        );
    }

    #[test]
    fn test_fetch_error_classification() {
        assert_eq!(
            FetchError::from_platform("acehinfo", PlatformError::NotFound("user".into())),
            FetchError::SourceNotFound("acehinfo".to_string())
        );

        let limited = FetchError::from_platform("acehinfo", PlatformError::RateLimit("429".into()));
        assert!(limited.is_rate_limited());

        let failed = FetchError::from_platform(
            "acehinfo",
            PlatformError::Network("connection reset".into()),
        );
        match failed {
            FetchError::FetchFailed { handle, message } => {
                assert_eq!(handle, "acehinfo");
                assert!(message.contains("connection reset"));
            }
            other => panic!("Expected FetchFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PlatformError::Network("timeout".into()).is_retryable());
        assert!(PlatformError::RateLimit("429".into()).is_retryable());
        assert!(PlatformError::Api { status: 503, message: "unavailable".into() }.is_retryable());

        assert!(!PlatformError::Api { status: 400, message: "bad".into() }.is_retryable());
        assert!(!PlatformError::NotFound("gone".into()).is_retryable());
        assert!(!PlatformError::Authentication("bad token".into()).is_retryable());
    }

    #[test]
    fn test_error_chain_preserves_context() {
        let error: RelayError = PublishError::PublishFailed {
            post_id: "1790000000000000001".to_string(),
            message: "duplicate content".to_string(),
        }
        .into();

        let message = error.to_string();
        assert!(message.starts_with("Publish error:"));
        assert!(message.contains("1790000000000000001"));
        assert!(message.contains("duplicate content"));
    }
}
