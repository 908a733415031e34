use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::aggregator::Archive;
use crate::runner::{DEFAULT_MAX_WORKERS, DEFAULT_TIMEOUT, RunRequest};

pub const CONFIG_FILE: &str = "testlens.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Where archived runs live and how long they are kept.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Relative paths are resolved against the workspace root.
    /// Example: ".testlens/archive" or "/var/lib/ci/test-history"
    pub dir: PathBuf,
    /// Used by `cleanup_old_archives`.
    pub keep_days: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".testlens/archive"),
            keep_days: 30,
        }
    }
}

/// Defaults applied to every run request built from this config.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub timeout_seconds: u64,
    pub max_workers: usize,
    pub verbose: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            max_workers: DEFAULT_MAX_WORKERS,
            verbose: false,
        }
    }
}

impl Config {
    /// Load `testlens.toml` from the workspace root, falling back to defaults if absent or invalid.
    pub fn load(workspace: &Path) -> Self {
        let path = workspace.join(CONFIG_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
            Self::default()
        })
    }

    pub fn archive(&self, workspace: &Path) -> Archive {
        Archive::new(workspace.join(&self.archive.dir))
    }

    pub fn request(&self, project: impl Into<PathBuf>) -> RunRequest {
        RunRequest::new(project)
            .timeout_seconds(self.runner.timeout_seconds)
            .max_workers(self.runner.max_workers)
            .verbose(self.runner.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.archive.keep_days, 30);
        assert_eq!(config.runner.timeout_seconds, 300);
        assert_eq!(
            config.archive(dir.path()).dir(),
            dir.path().join(".testlens/archive")
        );
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[archive]\nkeep_days = 7\n\n[runner]\nmax_workers = 2\n",
        )
        .unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config.archive.keep_days, 7);
        assert_eq!(config.archive.dir, PathBuf::from(".testlens/archive"));

        let request = config.request(dir.path());
        assert_eq!(request.max_workers, 2);
        assert_eq!(request.timeout, DEFAULT_TIMEOUT);
        assert!(!request.verbose);
    }

    #[test]
    fn invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[runner\ntimeout_seconds = ").unwrap();
        assert_eq!(Config::load(dir.path()).runner.max_workers, DEFAULT_MAX_WORKERS);
    }

    #[test]
    fn absolute_archive_dir_is_kept() {
        let workspace = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let config = Config {
            archive: ArchiveConfig {
                dir: elsewhere.path().to_path_buf(),
                keep_days: 1,
            },
            runner: RunnerConfig::default(),
        };
        assert_eq!(config.archive(workspace.path()).dir(), elsewhere.path());
    }
}
