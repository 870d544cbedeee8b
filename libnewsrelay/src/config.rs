//! Configuration management for newsrelay
//!
//! Settings live in a TOML file; the API credentials never do. They are read
//! from the process environment by [`Credentials::from_env`] and their absence
//! is fatal before any network call is made.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::retry::{RetryOverrides, RetryPolicy};

/// Largest page the read API hands out per call
pub const MAX_RESULTS_PER_SOURCE: usize = 10;

/// Longest account handle the platform allows
pub const MAX_HANDLE_LEN: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: Vec<String>,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_results: usize,
    #[serde(with = "duration_str")]
    pub recency_window: Duration,
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
    #[serde(with = "duration_str")]
    pub rate_limit_sleep: Duration,
    pub on_rate_limit: RateLimitAction,
    pub mode: PublishMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_results: MAX_RESULTS_PER_SOURCE,
            recency_window: Duration::from_secs(60 * 60),
            cooldown: Duration::from_secs(3),
            rate_limit_sleep: Duration::from_secs(15 * 60),
            on_rate_limit: RateLimitAction::Skip,
            mode: PublishMode::Post,
        }
    }
}

/// What the run controller does when a source answers with a rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitAction {
    /// Count the error and move on to the next source (cron deployments)
    Skip,
    /// Sleep `rate_limit_sleep`, then retry the same source once
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Compose new text with source attribution and re-upload media
    Post,
    /// Re-share the original post
    Reshare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub dir: String,
    pub published_file: String,
    pub cursor_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            published_file: "posted_ids.txt".to_string(),
            cursor_file: "last_seen.json".to_string(),
        }
    }
}

impl StateConfig {
    pub fn dir_path(&self) -> PathBuf {
        expand_path(&self.dir)
    }

    pub fn published_path(&self) -> PathBuf {
        self.dir_path().join(&self.published_file)
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.dir_path().join(&self.cursor_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub dir: String,
    pub title: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "status".to_string(),
            title: "AcehNewsHub".to_string(),
        }
    }
}

impl StatusConfig {
    pub fn dir_path(&self) -> PathBuf {
        expand_path(&self.dir)
    }
}

/// Retry policies per operation kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RetrySections")]
pub struct RetrySettings {
    pub download: RetryPolicy,
    pub upload: RetryPolicy,
    pub fetch: RetryPolicy,
}

/// `[retry]` as written in the file; each section overrides its own default
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetrySections {
    download: RetryOverrides,
    upload: RetryOverrides,
    fetch: RetryOverrides,
}

impl From<RetrySections> for RetrySettings {
    fn from(sections: RetrySections) -> Self {
        let defaults = RetrySettings::default();
        Self {
            download: sections.download.apply_to(defaults.download),
            upload: sections.upload.apply_to(defaults.upload),
            fetch: sections.fetch.apply_to(defaults.fetch),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            download: RetryPolicy::media_default(),
            upload: RetryPolicy::media_default(),
            fetch: RetryPolicy::none(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub upload_url: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
            upload_url: "https://upload.twitter.com".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A file named by `NEWSRELAY_CONFIG` must exist. A missing file at the
    /// XDG default location is not an error; the built-in configuration is
    /// used instead.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load_from_path(&expand_path(&path));
        }

        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::info!(
                "No config file at {}, using built-in sources and keywords",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(ConfigError::MissingField("sources".to_string()).into());
        }
        if let Some(bad) = self.sources.iter().find(|s| !is_valid_handle(s)) {
            return Err(ConfigError::Invalid(format!(
                "invalid source handle '{}' (1-{} letters, digits or underscores, no leading @)",
                bad, MAX_HANDLE_LEN
            ))
            .into());
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::MissingField("keywords".to_string()).into());
        }
        if self.run.max_results == 0 || self.run.max_results > MAX_RESULTS_PER_SOURCE {
            return Err(ConfigError::Invalid(format!(
                "run.max_results must be between 1 and {} (got {})",
                MAX_RESULTS_PER_SOURCE, self.run.max_results
            ))
            .into());
        }
        for (name, policy) in [
            ("retry.download", &self.retry.download),
            ("retry.upload", &self.retry.upload),
            ("retry.fetch", &self.retry.fetch),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.max_attempts must be at least 1",
                    name
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Create the built-in configuration: Aceh regional news accounts and
    /// place-name keywords
    pub fn default_config() -> Self {
        let sources = [
            "infoBMKG", "infoBMKG1", "Aceh", "ModusAceh", "acehworldtime", "Dialeksis_news",
            "SerambiNews", "tribunnews", "acehtribun", "acehinfo", "AcehKoran", "kumparan",
            "tempodotco", "metro_tv", "tvOneNews", "detikcom", "narasinewsroom", "najwashihab",
            "narasitv", "matanajwa", "beritasatu", "weathermonitors", "volcaholic1",
            "BBCIndonesia", "CNNIndonesia", "CNN", "trtworld", "ALJazeera", "AJEnglish",
            "kompascom",
        ];
        let keywords = [
            "Aceh", "Banda Aceh", "Berita", "Disaster", "Aceh Barat", "Aceh Barat Daya",
            "Aceh Besar", "Aceh Jaya", "Aceh Selatan", "Aceh Singkil", "Aceh Tamiang",
            "Aceh Tengah", "Aceh Tenggara", "Aceh Timur", "Aceh Utara", "Bener Meriah",
            "Bireuen", "Gayo Lues", "Nagan Raya", "Pidie", "Pidie Jaya", "Simeulue",
            "Subulussalam", "Langsa", "Lhokseumawe", "Meulaboh", "Sabang", "Takengon",
        ];

        Self {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            run: RunConfig::default(),
            state: StateConfig::default(),
            status: StatusConfig::default(),
            retry: RetrySettings::default(),
            api: ApiConfig::default(),
        }
    }
}

fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub const ENV_CONFIG_PATH: &str = "NEWSRELAY_CONFIG";

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("newsrelay").join("config.toml"))
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

// ============================================================================
// Credentials
// ============================================================================

pub const ENV_BEARER_TOKEN: &str = "X_BEARER_TOKEN";
pub const ENV_API_KEY: &str = "X_API_KEY";
pub const ENV_API_SECRET: &str = "X_API_SECRET";
pub const ENV_ACCESS_TOKEN: &str = "X_ACCESS_TOKEN";
pub const ENV_ACCESS_SECRET: &str = "X_ACCESS_SECRET";

/// API credentials: a bearer token for the read API and the four OAuth 1.0a
/// secrets for the write API
pub struct Credentials {
    pub bearer_token: SecretString,
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub access_token: SecretString,
    pub access_secret: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read all credentials from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary lookup; empty values count as missing
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| -> Result<SecretString> {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => {
                    Ok(SecretString::from(value.trim().to_string()))
                }
                _ => Err(ConfigError::MissingCredential(name.to_string()).into()),
            }
        };

        Ok(Self {
            bearer_token: get(ENV_BEARER_TOKEN)?,
            api_key: get(ENV_API_KEY)?,
            api_secret: get(ENV_API_SECRET)?,
            access_token: get(ENV_ACCESS_TOKEN)?,
            access_secret: get(ENV_ACCESS_SECRET)?,
        })
    }
}

/// Serde adapter for humantime duration strings ("3s", "15m", "1h")
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer};
        use std::time::Duration;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (ENV_BEARER_TOKEN, "bearer"),
            (ENV_API_KEY, "key"),
            (ENV_API_SECRET, "secret"),
            (ENV_ACCESS_TOKEN, "token"),
            (ENV_ACCESS_SECRET, "token-secret"),
        ])
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 30);
        assert!(config.keywords.iter().any(|k| k == "Aceh Utara"));
        assert_eq!(config.run.recency_window, Duration::from_secs(3600));
        assert_eq!(config.run.on_rate_limit, RateLimitAction::Skip);
    }

    #[test]
    fn test_load_minimal_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
sources = ["demo"]
keywords = ["Aceh"]

[run]
cooldown = "0s"
on_rate_limit = "wait"
rate_limit_sleep = "2m"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.sources, vec!["demo"]);
        assert_eq!(config.run.cooldown, Duration::ZERO);
        assert_eq!(config.run.rate_limit_sleep, Duration::from_secs(120));
        assert_eq!(config.run.on_rate_limit, RateLimitAction::Wait);
        assert_eq!(config.run.max_results, MAX_RESULTS_PER_SOURCE);
        assert_eq!(config.run.mode, PublishMode::Post);
        assert_eq!(config.state.published_file, "posted_ids.txt");
        assert_eq!(config.retry.download.max_attempts, 3);
        assert_eq!(config.retry.fetch.max_attempts, 1);
    }

    #[test]
    fn test_partial_retry_section_keeps_its_own_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
sources = ["demo"]
keywords = ["Aceh"]

[retry.fetch]
base_delay = "5s"

[retry.upload]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.retry.fetch.max_attempts, 1);
        assert_eq!(config.retry.fetch.base_delay, Duration::from_secs(5));
        assert_eq!(config.retry.fetch.factor, 1);
        assert_eq!(config.retry.upload.max_attempts, 5);
        assert_eq!(config.retry.upload.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.upload.factor, 2);
        assert_eq!(config.retry.download, RetryPolicy::media_default());
    }

    #[test]
    fn test_validate_rejects_bad_handles() {
        let mut config = Config::default_config();
        config.sources = vec!["@acehinfo".to_string()];
        assert!(config.validate().is_err());

        config.sources = vec!["a_very_long_handle_name".to_string()];
        assert!(config.validate().is_err());

        config.sources = vec!["Dialeksis_news".to_string()];
        config.validate().unwrap();
    }

    #[test]
    fn test_load_rejects_oversized_page() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "sources = [\"demo\"]\nkeywords = [\"Aceh\"]\n[run]\nmax_results = 50\n",
        )
        .unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("max_results"));
    }

    #[test]
    fn test_load_rejects_empty_sources() {
        let mut config = Config::default_config();
        config.sources.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sources"));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "sources = [").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_state_paths_join_dir() {
        let state = StateConfig {
            dir: "/var/lib/newsrelay".to_string(),
            ..Default::default()
        };
        assert_eq!(
            state.published_path(),
            PathBuf::from("/var/lib/newsrelay/posted_ids.txt")
        );
        assert_eq!(
            state.cursor_path(),
            PathBuf::from("/var/lib/newsrelay/last_seen.json")
        );
    }

    #[test]
    fn test_credentials_from_lookup() {
        let env = full_env();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.bearer_token.expose_secret(), "bearer");
        assert_eq!(creds.access_secret.expose_secret(), "token-secret");
        assert!(!format!("{:?}", creds).contains("bearer"));
    }

    #[test]
    fn test_credentials_missing_or_empty_is_fatal() {
        let mut env = full_env();
        env.insert(ENV_ACCESS_TOKEN, "   ");
        let err = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains(ENV_ACCESS_TOKEN));

        env.remove(ENV_API_KEY);
        let err = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains(ENV_API_KEY));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_honours_env() {
        std::env::set_var(ENV_CONFIG_PATH, "/tmp/newsrelay-test/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var(ENV_CONFIG_PATH);
        assert_eq!(path, PathBuf::from("/tmp/newsrelay-test/config.toml"));
    }

    #[test]
    #[serial]
    fn test_load_errors_when_env_names_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var(ENV_CONFIG_PATH, temp_dir.path().join("absent.toml"));
        let result = Config::load();
        std::env::remove_var(ENV_CONFIG_PATH);

        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        for (k, v) in full_env() {
            std::env::set_var(k, v);
        }
        let result = Credentials::from_env();
        for k in full_env().keys() {
            std::env::remove_var(k);
        }
        assert!(result.is_ok());

        let err = Credentials::from_env().unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Config(ConfigError::MissingCredential(_))
        ));
    }
}
