//! Persistent dedup state
//!
//! Two flat files back the store:
//!
//! - the published ledger, one post identifier per line, append-only and
//!   deduplicated on read. Every successful publish is appended immediately so
//!   an interrupted run never loses a dedup record.
//! - the cursor file, a JSON object mapping each source handle to its
//!   last-seen post identifier, cached account id and a publish counter.
//!
//! Loading never fails: a missing or corrupt file yields empty state. Saving
//! replaces each file atomically (write to a temp file in the same directory,
//! then rename).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::StateConfig;
use crate::error::{Result, StateError};
use crate::types::compare_ids;

/// Per-source bookkeeping kept between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    /// Greatest post identifier fetched so far; sent as `since_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_id: Option<String>,
    /// Resolved account identifier, saves a handle lookup per run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default)]
    pub published_total: u64,
}

/// Accepts the current object shape and the older `handle -> "id"` shape
#[derive(Deserialize)]
#[serde(untagged)]
enum CursorRepr {
    Full(SourceCursor),
    LegacyId(String),
    LegacyNumber(u64),
}

impl From<CursorRepr> for SourceCursor {
    fn from(repr: CursorRepr) -> Self {
        match repr {
            CursorRepr::Full(cursor) => cursor,
            CursorRepr::LegacyId(id) => SourceCursor {
                last_seen_id: Some(id),
                ..Default::default()
            },
            CursorRepr::LegacyNumber(id) => SourceCursor {
                last_seen_id: Some(id.to_string()),
                ..Default::default()
            },
        }
    }
}

/// In-memory view of everything that has been seen or published
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeenState {
    pub published: HashSet<String>,
    pub cursors: BTreeMap<String, SourceCursor>,
}

impl SeenState {
    pub fn is_published(&self, post_id: &str) -> bool {
        self.published.contains(post_id)
    }
}

/// File-backed [`SeenState`] with incremental ledger appends
#[derive(Debug)]
pub struct StateStore {
    published_path: PathBuf,
    cursor_path: PathBuf,
    state: SeenState,
}

impl StateStore {
    /// Load state from the configured files
    pub fn load(config: &StateConfig) -> Self {
        Self::open(config.published_path(), config.cursor_path())
    }

    /// Load state from explicit file paths
    pub fn open(published_path: PathBuf, cursor_path: PathBuf) -> Self {
        let state = SeenState {
            published: read_ledger(&published_path),
            cursors: read_cursors(&cursor_path),
        };
        debug!(
            "Loaded state: {} published ids, {} source cursors",
            state.published.len(),
            state.cursors.len()
        );

        Self {
            published_path,
            cursor_path,
            state,
        }
    }

    pub fn state(&self) -> &SeenState {
        &self.state
    }

    pub fn is_published(&self, post_id: &str) -> bool {
        self.state.is_published(post_id)
    }

    pub fn cursor(&self, source: &str) -> Option<&SourceCursor> {
        self.state.cursors.get(source)
    }

    /// Record a published post.
    ///
    /// Idempotent: recording an id twice is a no-op. The id is appended to the
    /// ledger file before returning, so it survives a crash later in the run.
    /// If the append fails the id is still held in memory and written by
    /// [`StateStore::save`].
    pub fn record(&mut self, source: &str, post_id: &str) -> Result<()> {
        if !self.state.published.insert(post_id.to_string()) {
            return Ok(());
        }
        self.state
            .cursors
            .entry(source.to_string())
            .or_default()
            .published_total += 1;

        append_line(&self.published_path, post_id)?;
        debug!("Recorded {} from @{}", post_id, source);
        Ok(())
    }

    /// Move the source's watermark forward; never moves it backwards
    pub fn advance_cursor(&mut self, source: &str, newest_id: &str) {
        let cursor = self.state.cursors.entry(source.to_string()).or_default();
        let newer = match &cursor.last_seen_id {
            Some(current) => compare_ids(newest_id, current).is_gt(),
            None => true,
        };
        if newer {
            cursor.last_seen_id = Some(newest_id.to_string());
        }
    }

    pub fn set_account_id(&mut self, source: &str, account_id: &str) {
        self.state
            .cursors
            .entry(source.to_string())
            .or_default()
            .account_id = Some(account_id.to_string());
    }

    pub fn clear_account_id(&mut self, source: &str) {
        if let Some(cursor) = self.state.cursors.get_mut(source) {
            cursor.account_id = None;
        }
    }

    /// Overwrite both state files, each all-or-nothing
    pub fn save(&self) -> Result<()> {
        let mut ids: Vec<&str> = self.state.published.iter().map(String::as_str).collect();
        ids.sort_by(|a, b| compare_ids(a, b));
        let mut ledger = ids.join("\n");
        if !ledger.is_empty() {
            ledger.push('\n');
        }
        write_atomic(&self.published_path, ledger.as_bytes())?;

        let cursors = serde_json::to_string_pretty(&self.state.cursors)
            .map_err(StateError::Serialize)?;
        write_atomic(&self.cursor_path, cursors.as_bytes())?;

        debug!(
            "Saved state: {} published ids, {} source cursors",
            self.state.published.len(),
            self.state.cursors.len()
        );
        Ok(())
    }
}

fn read_ledger(path: &Path) -> HashSet<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => {
            warn!(
                "Failed to read published ledger {}: {}. Starting empty.",
                path.display(),
                e
            );
            HashSet::new()
        }
    }
}

fn read_cursors(path: &Path) -> BTreeMap<String, SourceCursor> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!("Failed to read cursor file {}: {}. Starting empty.", path.display(), e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<BTreeMap<String, CursorRepr>>(&content) {
        Ok(raw) => raw.into_iter().map(|(k, v)| (k, v.into())).collect(),
        Err(e) => {
            warn!("Corrupt cursor file {}: {}. Starting empty.", path.display(), e);
            BTreeMap::new()
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn ensure_parent(path: &Path) -> std::result::Result<PathBuf, StateError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| io_error(&parent, e))?;
    Ok(parent)
}

fn append_line(path: &Path, line: &str) -> std::result::Result<(), StateError> {
    ensure_parent(path)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    writeln!(file, "{}", line).map_err(|e| io_error(path, e))?;
    file.sync_data().map_err(|e| io_error(path, e))?;
    Ok(())
}

/// Replace `path` with `contents` so readers see either the old or the new file
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::result::Result<(), StateError> {
    let parent = ensure_parent(path)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| io_error(path, e))?;
    tmp.write_all(contents).map_err(|e| io_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}
