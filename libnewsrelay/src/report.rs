//! Run summary and status dashboard
//!
//! [`RunSummary`] is produced once per run by the controller. The dashboard
//! writes it as `status.json` plus a static `index.html` next to it; nothing
//! in the pipeline reads these files back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::StatusConfig;
use crate::error::Result;
use crate::filter::SkipReason;
use crate::state::write_atomic;

pub const STATUS_JSON: &str = "status.json";
pub const STATUS_HTML: &str = "index.html";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub posted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duplicate: usize,
    pub stale: usize,
    pub no_match: usize,
    pub media_dropped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SourceStats {
    pub fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        match reason {
            SkipReason::Duplicate => self.duplicate += 1,
            SkipReason::Stale => self.stale += 1,
            SkipReason::NoMatch => self.no_match += 1,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        self.last_error = Some(message.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_time: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub posted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub media_dropped: usize,
    pub per_source: BTreeMap<String, SourceStats>,
}

impl RunSummary {
    /// Start a summary with a zeroed entry for every configured source
    pub fn new(run_time: DateTime<Utc>, sources: &[String]) -> Self {
        Self {
            run_time,
            finished_at: run_time,
            posted: 0,
            skipped: 0,
            errors: 0,
            media_dropped: 0,
            per_source: sources
                .iter()
                .map(|s| (s.clone(), SourceStats::default()))
                .collect(),
        }
    }

    pub fn source_mut(&mut self, source: &str) -> &mut SourceStats {
        self.per_source.entry(source.to_string()).or_default()
    }

    /// Recompute totals from the per-source breakdown and stamp the end time
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
        self.posted = self.per_source.values().map(|s| s.posted).sum();
        self.skipped = self.per_source.values().map(|s| s.skipped).sum();
        self.errors = self.per_source.values().map(|s| s.errors).sum();
        self.media_dropped = self.per_source.values().map(|s| s.media_dropped).sum();
    }

    /// True when every source errored and nothing was published
    pub fn is_total_failure(&self) -> bool {
        !self.per_source.is_empty()
            && self
                .per_source
                .values()
                .all(|s| s.errors > 0 && s.posted == 0)
    }

    /// Plain-text rendering for terminals and cron mail
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run at {}", self.run_time.to_rfc3339());
        let _ = writeln!(
            out,
            "Posted: {}  Skipped: {}  Errors: {}  Media dropped: {}",
            self.posted, self.skipped, self.errors, self.media_dropped
        );
        for (source, stats) in &self.per_source {
            if *stats == SourceStats::default() {
                continue;
            }
            let _ = write!(
                out,
                "  @{}: posted {}, skipped {} (dup {}, stale {}, no match {}), errors {}",
                source,
                stats.posted,
                stats.skipped,
                stats.duplicate,
                stats.stale,
                stats.no_match,
                stats.errors
            );
            if let Some(err) = &stats.last_error {
                let _ = write!(out, " [{}]", err);
            }
            let _ = writeln!(out);
        }
        out
    }
}

/// Writes the status artifacts for a finished run
pub struct StatusDashboard {
    dir: PathBuf,
    title: String,
}

impl StatusDashboard {
    pub fn new(config: &StatusConfig) -> Self {
        Self {
            dir: config.dir_path(),
            title: config.title.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `status.json` and `index.html`, each atomically
    pub fn write(&self, summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)
            .map_err(crate::error::StateError::Serialize)?;
        write_atomic(&self.dir.join(STATUS_JSON), json.as_bytes())?;
        write_atomic(
            &self.dir.join(STATUS_HTML),
            render_html(&self.title, summary).as_bytes(),
        )?;
        info!("Status dashboard written to {}", self.dir.display());
        Ok(())
    }
}

fn render_html(title: &str, summary: &RunSummary) -> String {
    let title = escape_html(title);
    let mut rows = String::new();
    for (source, stats) in &summary.per_source {
        let _ = writeln!(
            rows,
            "        <tr><td>@{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(source),
            stats.posted,
            stats.skipped,
            stats.duplicate,
            stats.stale,
            stats.no_match,
            stats.media_dropped,
            stats.errors,
            escape_html(stats.last_error.as_deref().unwrap_or("")),
        );
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>{title} · Run Status</title>
  <style>
    body{{font-family:system-ui,Arial;margin:24px;color:#111}}
    .card{{border-radius:12px;padding:16px;background:#f8f9fb;box-shadow:0 6px 18px rgba(10,10,10,0.06);max-width:1000px}}
    h1{{margin-top:0}}
    table{{border-collapse:collapse;width:100%;background:#fff}}
    th,td{{padding:6px 10px;border-bottom:1px solid #e5e7eb;text-align:left}}
    td.err{{color:#b91c1c}}
  </style>
</head>
<body>
  <div class="card">
    <h1>{title} · Latest Run</h1>
    <p><strong>Run time:</strong> {run_time}</p>
    <p><strong>Finished:</strong> {finished}</p>
    <p><strong>Posted:</strong> {posted}</p>
    <p><strong>Skipped:</strong> {skipped}</p>
    <p><strong>Errors:</strong> {errors}</p>
    <p><strong>Media dropped:</strong> {media_dropped}</p>
    <h2>Per-source detail</h2>
    <table>
      <thead>
        <tr><th>Source</th><th>Posted</th><th>Skipped</th><th>Duplicate</th><th>Stale</th><th>No match</th><th>Media dropped</th><th>Errors</th><th>Last error</th></tr>
      </thead>
      <tbody>
{rows}      </tbody>
    </table>
  </div>
</body>
</html>
"#,
        title = title,
        run_time = summary.run_time.to_rfc3339(),
        finished = summary.finished_at.to_rfc3339(),
        posted = summary.posted,
        skipped = summary.skipped,
        errors = summary.errors,
        media_dropped = summary.media_dropped,
        rows = rows,
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
