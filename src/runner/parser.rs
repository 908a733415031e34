use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::{FrameworkInfo, TestResult, TestSummary, UnifiedTestResults};

/// Everything a finished invocation left behind.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    pub project_root: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Contents of the structured report file, if one was produced.
    pub report: Option<String>,
}

impl RawOutput {
    /// Both captured streams, stdout first.
    pub fn combined_text(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Render `file` relative to the project root when it lives inside it.
    pub fn relative_path(&self, file: &str) -> String {
        Path::new(file)
            .strip_prefix(&self.project_root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| file.to_string())
    }
}

/// Output of a single parser stage.
#[derive(Debug, Clone, Default)]
pub struct ParsedReport {
    pub tests: Vec<TestResult>,
    /// Counts recovered without per-test records (e.g. a bare summary line).
    pub counts: Option<TestSummary>,
    /// Wall-clock seconds reported by the framework itself.
    pub duration: Option<f64>,
    /// Records dropped because they could not be decoded.
    pub skipped_records: usize,
}

impl ParsedReport {
    pub fn from_tests(tests: Vec<TestResult>) -> Self {
        Self {
            tests,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.counts.as_ref().is_none_or(|c| c.total == 0)
    }

    /// Summary follows the test list when there is one, so list and counts agree.
    pub fn into_results(self, project: String, framework: FrameworkInfo) -> UnifiedTestResults {
        let mut results = UnifiedTestResults::from_tests(project, framework, self.tests);
        if results.tests.is_empty()
            && let Some(counts) = self.counts
        {
            results.summary = counts;
        }
        if let Some(duration) = self.duration {
            results.summary.duration = duration;
        }
        results.summary.refresh_success_rate();
        results
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no structured report was produced")]
    MissingReport,
    #[error("malformed report: {0}")]
    Malformed(String),
    #[error("no recognizable test results in output")]
    NoResults,
}

/// One stage of the report pipeline: structured artifact or text heuristics.
pub trait ReportParser: Send + Sync {
    /// Short label used in diagnostics.
    fn name(&self) -> &'static str;

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError>;
}

/// Failure of every stage, in the order they were tried.
#[derive(Debug, Default)]
pub struct PipelineFailure {
    pub attempts: Vec<(&'static str, ParseError)>,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .attempts
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Try each stage in order; the first one that recovers results wins.
pub fn run_pipeline(
    stages: &[&dyn ReportParser],
    raw: &RawOutput,
) -> Result<ParsedReport, PipelineFailure> {
    let mut failure = PipelineFailure::default();
    for stage in stages {
        match stage.parse(raw) {
            Ok(report) if !report.is_empty() => {
                if report.skipped_records > 0 {
                    tracing::warn!(
                        parser = stage.name(),
                        skipped = report.skipped_records,
                        "skipped malformed test records"
                    );
                }
                return Ok(report);
            }
            Ok(_) => failure.attempts.push((stage.name(), ParseError::NoResults)),
            Err(e) => {
                tracing::debug!(parser = stage.name(), error = %e, "parser stage failed");
                failure.attempts.push((stage.name(), e));
            }
        }
    }
    Err(failure)
}

/// Decode each element on its own so one bad record does not sink the report.
pub(crate) fn decode_records<T, F>(
    records: Vec<serde_json::Value>,
    mut convert: F,
) -> (Vec<TestResult>, usize)
where
    T: serde::de::DeserializeOwned,
    F: FnMut(T) -> Option<TestResult>,
{
    let mut tests = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for record in records {
        match serde_json::from_value::<T>(record).ok().and_then(&mut convert) {
            Some(test) => tests.push(test),
            None => skipped += 1,
        }
    }
    (tests, skipped)
}

/// Parse the report body as JSON, treating a blank artifact as missing.
pub(crate) fn report_json<T: serde::de::DeserializeOwned>(
    raw: &RawOutput,
) -> Result<T, ParseError> {
    let body = raw
        .report
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(ParseError::MissingReport)?;
    serde_json::from_str(body).map_err(|e| ParseError::Malformed(e.to_string()))
}

/// Strip ANSI escape sequences from a string.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // Skip until we hit a letter (end of escape sequence)
            for c2 in chars.by_ref() {
                if c2.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// First non-empty line, used as a one-line error message.
pub(crate) fn first_line(s: &str) -> Option<String> {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Last `n` lines of `s`, for error context.
pub(crate) fn tail(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Milliseconds as reported by JS tooling, converted to seconds.
pub(crate) fn millis_to_secs(ms: Option<f64>) -> f64 {
    match ms {
        Some(ms) if ms >= 0.0 => ms / 1000.0,
        _ => TestResult::NOT_TIMED,
    }
}
