//! Durable, timestamped history of run results.
//!
//! One JSON file per archived run, named
//! `{run_name}_{YYYYmmddTHHMMSS.ffffffZ}.json`. Files are written to a temp
//! file in the same directory and then linked into place without replacing
//! anything, so concurrent writers (tasks or processes) never clobber each
//! other and readers never see a partial document.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{TestFramework, UnifiedTestResults};

const DEFAULT_RUN_NAME: &str = "test_results";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
/// Attempts at finding a free file name when the first choice is taken.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// One archived run as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    #[serde(flatten)]
    pub results: UnifiedTestResults,
    pub run_name: Option<String>,
    pub archived_at: DateTime<Utc>,
    /// File the entry was read from.
    #[serde(skip)]
    pub path: PathBuf,
}

/// An archive rooted at an explicit directory.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `result` and return the path of the new archive file.
    ///
    /// `timestamp` defaults to now and is embedded in the file name.
    pub fn archive_results(
        &self,
        result: &UnifiedTestResults,
        timestamp: Option<DateTime<Utc>>,
        run_name: Option<&str>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::archive_io(&self.dir, e))?;

        let archived_at = timestamp.unwrap_or_else(Utc::now);
        let entry = ArchiveEntry {
            results: result.clone(),
            run_name: run_name.map(str::to_string),
            archived_at,
            path: PathBuf::new(),
        };
        let body = serde_json::to_vec_pretty(&entry)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(".json.part")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::archive_io(&self.dir, e))?;
        temp.write_all(&body)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| Error::archive_io(temp.path(), e))?;

        let stem = format!(
            "{}_{}",
            sanitize(run_name.unwrap_or(DEFAULT_RUN_NAME)),
            archived_at.format(TIMESTAMP_FORMAT)
        );
        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}-{}.json", stem, attempt)
            };
            let target = self.dir.join(name);
            match temp.persist_noclobber(&target) {
                Ok(_) => {
                    tracing::info!(path = %target.display(), tests = result.tests.len(), "archived test results");
                    return Ok(target);
                }
                Err(e)
                    if e.error.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt < MAX_NAME_ATTEMPTS =>
                {
                    temp = e.file;
                    attempt += 1;
                }
                Err(e) => return Err(Error::archive_io(target, e.error)),
            }
        }
    }

    /// All readable entries, newest first, optionally limited to one framework.
    pub fn get_archived_results(&self, framework: Option<TestFramework>) -> Result<Vec<ArchiveEntry>> {
        let mut entries: Vec<ArchiveEntry> = self
            .archive_files()?
            .into_iter()
            .filter_map(|path| read_entry(&path))
            .filter(|e| framework.is_none_or(|f| e.results.framework_kind() == f))
            .collect();
        entries.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        Ok(entries)
    }

    pub fn get_latest_result(&self) -> Result<Option<ArchiveEntry>> {
        Ok(self.get_archived_results(None)?.into_iter().next())
    }

    /// The `limit` most recent entries, newest first.
    pub fn get_result_history(&self, limit: usize) -> Result<Vec<ArchiveEntry>> {
        let mut entries = self.get_archived_results(None)?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Delete archive files last modified more than `keep_days` days ago.
    /// Returns how many were removed.
    pub fn cleanup_old_archives(&self, keep_days: u64) -> Result<usize> {
        let threshold = Duration::from_secs(keep_days.saturating_mul(SECONDS_PER_DAY));
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.archive_files()? {
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat archive file");
                    continue;
                }
            };
            // Files with a modification time in the future count as fresh.
            let age = now.duration_since(modified).unwrap_or_default();
            if age > threshold {
                std::fs::remove_file(&path).map_err(|e| Error::archive_io(&path, e))?;
                removed += 1;
            }
        }

        tracing::info!(removed, keep_days, dir = %self.dir.display(), "cleaned up old archives");
        Ok(removed)
    }

    fn archive_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let pattern = glob::Pattern::escape(&self.dir.to_string_lossy());
        let pattern = format!("{}/*.json", pattern);
        let paths = glob::glob(&pattern).map_err(|e| {
            Error::archive_io(
                &self.dir,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            )
        })?;
        // Only names this archive writes; other JSON files in the directory are left alone.
        Ok(paths
            .flatten()
            .filter(|p| p.is_file() && embedded_timestamp(p).is_some())
            .collect())
    }
}

fn read_entry(path: &Path) -> Option<ArchiveEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable archive file");
            return None;
        }
    };
    match serde_json::from_str::<ArchiveEntry>(&content) {
        Ok(mut entry) => {
            entry.path = path.to_path_buf();
            Some(entry)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping malformed archive file");
            None
        }
    }
}

/// Timestamp embedded in the file name, falling back to the stored `archived_at`.
fn sort_key(entry: &ArchiveEntry) -> (DateTime<Utc>, String) {
    let name = entry
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    (embedded_timestamp(&entry.path).unwrap_or(entry.archived_at), name)
}

/// Parse `{run_name}_{timestamp}[-N].json`.
fn embedded_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    if path.extension()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (_, ts) = stem.rsplit_once('_')?;
    let ts = ts.split('-').next().unwrap_or(ts);
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Keep file names portable: anything but `[A-Za-z0-9._-]` becomes `-`.
fn sanitize(run_name: &str) -> String {
    let cleaned: String = run_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        DEFAULT_RUN_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_run_names() {
        assert_eq!(sanitize("nightly ci/linux"), "nightly-ci-linux");
        assert_eq!(sanitize("../etc"), "-etc");
        assert_eq!(sanitize("  "), "test_results");
    }

    #[test]
    fn timestamp_in_name_round_trips() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:30:45.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = format!("run_name_{}", ts.format(TIMESTAMP_FORMAT));
        assert_eq!(name, "run_name_20240501T123045.123456Z");
        let parsed = embedded_timestamp(Path::new(&format!("{}.json", name)));
        assert_eq!(parsed, Some(ts));
        let parsed = embedded_timestamp(Path::new(&format!("{}-3.json", name)));
        assert_eq!(parsed, Some(ts));
    }

    #[test]
    fn foreign_file_names_have_no_timestamp() {
        assert_eq!(embedded_timestamp(Path::new("package.json")), None);
        assert_eq!(embedded_timestamp(Path::new("coverage_final.json")), None);
        assert_eq!(
            embedded_timestamp(Path::new("run_20240501T123045.123456Z.json.part")),
            None
        );
    }
}
