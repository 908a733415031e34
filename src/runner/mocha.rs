use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::{TestFramework, TestResult, TestStatus, TestSummary};

use super::parser::{self, ParseError, ParsedReport, RawOutput, ReportParser};
use super::{FrameworkAdapter, Invocation, RunRequest, split_command};

pub struct MochaAdapter {
    base: Vec<String>,
    structured: MochaJsonParser,
    text: MochaTextParser,
}

impl Default for MochaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MochaAdapter {
    pub fn new() -> Self {
        Self::with_command("npx mocha")
    }

    pub fn with_command(command: &str) -> Self {
        Self {
            base: split_command(command),
            structured: MochaJsonParser,
            text: MochaTextParser,
        }
    }
}

impl FrameworkAdapter for MochaAdapter {
    fn framework(&self) -> TestFramework {
        TestFramework::Mocha
    }

    fn build_command(&self, request: &RunRequest, report_path: Option<&Path>) -> Invocation {
        let mut cmd = Invocation::from_base(&self.base);
        match report_path {
            Some(report) => {
                cmd.args(["--reporter", "json", "--reporter-option"])
                    .arg(format!("output={}", report.display()));
            }
            None => {
                cmd.args(["--reporter", "spec"]);
            }
        }
        cmd.arg("--no-color");
        if request.max_workers > 1 {
            cmd.arg("--parallel")
                .arg("--jobs")
                .arg(request.max_workers.to_string());
        }
        if let Some(config) = &request.config_file {
            cmd.arg("--config").arg(config.to_string_lossy());
        }
        if let Some(pattern) = &request.test_pattern {
            cmd.arg("--grep").arg(pattern.as_str());
        }
        if let Some(file) = &request.test_file {
            cmd.arg(file.as_str());
        }
        cmd
    }

    fn structured_parser(&self) -> &dyn ReportParser {
        &self.structured
    }

    fn text_parser(&self) -> &dyn ReportParser {
        &self.text
    }
}

// --- mocha json reporter deserialization types ---

#[derive(Debug, Deserialize)]
struct MochaReport {
    stats: Option<MochaStats>,
    #[serde(default)]
    tests: Vec<serde_json::Value>,
    #[serde(default)]
    pending: Vec<serde_json::Value>,
    #[serde(default)]
    failures: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MochaStats {
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MochaTest {
    title: String,
    full_title: Option<String>,
    file: Option<String>,
    duration: Option<f64>,
    err: Option<MochaError>,
    current_retry: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct MochaError {
    message: Option<String>,
    stack: Option<String>,
}

impl MochaTest {
    fn key(&self) -> String {
        self.full_title.clone().unwrap_or_else(|| self.title.clone())
    }

    fn has_error(&self) -> bool {
        self.err
            .as_ref()
            .is_some_and(|e| e.message.is_some() || e.stack.is_some())
    }

    fn into_result(self, status: TestStatus, raw: &RawOutput) -> TestResult {
        let name = self.key();
        let err = self.err.unwrap_or_default();
        let file = self.file.map(|f| raw.relative_path(&f));
        let mut result = TestResult::new(name, status)
            .with_duration(parser::millis_to_secs(self.duration))
            .with_location(file, None)
            .with_error(
                err.message.map(|m| parser::strip_ansi(&m)),
                err.stack.map(|s| parser::strip_ansi(&s)),
            );
        if let Some(retry) = self.current_retry.filter(|r| *r > 0) {
            result = result.with_metadata("retries", retry.into());
        }
        result
    }
}

fn titles(records: &[serde_json::Value]) -> HashSet<String> {
    records
        .iter()
        .filter_map(|r| serde_json::from_value::<MochaTest>(r.clone()).ok())
        .map(|t| t.key())
        .collect()
}

pub struct MochaJsonParser;

impl ReportParser for MochaJsonParser {
    fn name(&self) -> &'static str {
        "mocha-json"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let report: MochaReport = parser::report_json(raw)?;
        let failed = titles(&report.failures);
        let pending = titles(&report.pending);

        let (mut tests, skipped) = parser::decode_records(report.tests, |t: MochaTest| {
            let key = t.key();
            let status = if failed.contains(&key) || t.has_error() {
                TestStatus::Failed
            } else if pending.contains(&key) {
                TestStatus::Skipped
            } else {
                TestStatus::Passed
            };
            Some(t.into_result(status, raw))
        });

        // Hook failures ("before all" hook) appear only in `failures`.
        let known: HashSet<String> = tests.iter().map(|t| t.name.clone()).collect();
        for record in report.failures {
            if let Ok(t) = serde_json::from_value::<MochaTest>(record)
                && !known.contains(&t.key())
            {
                tests.push(t.into_result(TestStatus::Error, raw));
            }
        }

        Ok(ParsedReport {
            tests,
            counts: None,
            duration: report.stats.and_then(|s| s.duration).map(|ms| ms / 1000.0),
            skipped_records: skipped,
        })
    }
}

static PASS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[✓✔√]\s+(?P<name>.+?)(?:\s+\((?P<ms>\d+)ms\))?$").expect("valid regex")
});

static FAIL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<n>\d+)\) (?P<name>.+)$").expect("valid regex"));

static PENDING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- (?P<name>.+)$").expect("valid regex"));

static COUNT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<n>\d+) (?P<kind>passing|failing|pending)(?: \((?P<dur>\d+)(?P<unit>ms|s|m)\))?$")
        .expect("valid regex")
});

/// Reads mocha's `spec` reporter output.
pub struct MochaTextParser;

impl ReportParser for MochaTextParser {
    fn name(&self) -> &'static str {
        "mocha-text"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let text = parser::strip_ansi(&raw.combined_text());
        let mut tests: Vec<TestResult> = Vec::new();
        let mut counts: Option<TestSummary> = None;
        let mut duration = None;
        // Numbered failures are listed twice: inline, then with details after the counts.
        let mut seen_counts = false;

        for line in text.lines().map(str::trim) {
            if let Some(caps) = COUNT_LINE.captures(line) {
                seen_counts = true;
                let n: usize = caps["n"].parse().unwrap_or(0);
                let summary = counts.get_or_insert_with(TestSummary::zero);
                match &caps["kind"] {
                    "passing" => summary.passed += n,
                    "failing" => summary.failed += n,
                    _ => summary.skipped += n,
                }
                summary.total = summary.passed + summary.failed + summary.skipped;
                summary.refresh_success_rate();
                if let Some(dur) = caps.name("dur").and_then(|d| d.as_str().parse::<f64>().ok()) {
                    duration = Some(match caps.name("unit").map(|u| u.as_str()) {
                        Some("ms") => dur / 1000.0,
                        Some("m") => dur * 60.0,
                        _ => dur,
                    });
                }
            } else if seen_counts {
                continue;
            } else if let Some(caps) = PASS_LINE.captures(line) {
                let ms = caps.name("ms").and_then(|m| m.as_str().parse::<f64>().ok());
                tests.push(
                    TestResult::new(caps["name"].trim(), TestStatus::Passed)
                        .with_duration(parser::millis_to_secs(ms)),
                );
            } else if let Some(caps) = FAIL_LINE.captures(line) {
                tests.push(TestResult::new(caps["name"].trim(), TestStatus::Failed));
            } else if let Some(caps) = PENDING_LINE.captures(line) {
                tests.push(TestResult::new(caps["name"].trim(), TestStatus::Skipped));
            }
        }

        if tests.is_empty() && counts.is_none() {
            return Err(ParseError::NoResults);
        }
        Ok(ParsedReport {
            tests,
            counts,
            duration,
            skipped_records: 0,
        })
    }
}
