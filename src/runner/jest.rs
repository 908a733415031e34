use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::{TestFramework, TestResult, TestStatus, TestSummary};

use super::parser::{self, ParseError, ParsedReport, RawOutput, ReportParser};
use super::{FrameworkAdapter, Invocation, RunRequest, split_command};

/// Jest adapter, run through `npx` like the other JS tools.
pub struct JestAdapter {
    base: Vec<String>,
    structured: JestJsonParser,
    text: JestTextParser,
}

impl Default for JestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl JestAdapter {
    pub fn new() -> Self {
        Self::with_command("npx jest")
    }

    pub fn with_command(command: &str) -> Self {
        Self {
            base: split_command(command),
            structured: JestJsonParser,
            text: JestTextParser,
        }
    }
}

impl FrameworkAdapter for JestAdapter {
    fn framework(&self) -> TestFramework {
        TestFramework::Jest
    }

    fn build_command(&self, request: &RunRequest, report_path: Option<&Path>) -> Invocation {
        let mut cmd = Invocation::from_base(&self.base);
        if let Some(report) = report_path {
            cmd.arg("--json")
                .arg(format!("--outputFile={}", report.display()));
        }
        cmd.args(["--ci", "--colors=false"])
            .arg(format!("--maxWorkers={}", request.max_workers));
        if let Some(config) = &request.config_file {
            cmd.arg("--config").arg(config.to_string_lossy());
        }
        if request.verbose {
            cmd.arg("--verbose");
        }
        if let Some(pattern) = &request.test_pattern {
            cmd.arg("-t").arg(pattern.as_str());
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

// --- Jest JSON deserialization types (also emitted by vitest's json reporter) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    #[serde(default)]
    test_results: Vec<serde_json::Value>,
    start_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestFile {
    name: String,
    #[serde(default)]
    assertion_results: Vec<serde_json::Value>,
    status: Option<String>,
    message: Option<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestAssertion {
    title: String,
    full_name: Option<String>,
    #[serde(default)]
    ancestor_titles: Vec<String>,
    status: String,
    duration: Option<f64>,
    #[serde(default)]
    failure_messages: Vec<String>,
    location: Option<JestLocation>,
}

#[derive(Debug, Deserialize)]
struct JestLocation {
    line: u32,
    column: Option<u32>,
}

fn status_from_state(state: &str) -> Option<TestStatus> {
    match state {
        "passed" | "pass" => Some(TestStatus::Passed),
        "failed" | "fail" => Some(TestStatus::Failed),
        "pending" | "skipped" | "skip" | "todo" | "disabled" | "focused" => {
            Some(TestStatus::Skipped)
        }
        _ => None,
    }
}

impl JestAssertion {
    fn into_result(self, file: &str) -> Option<TestResult> {
        let status = status_from_state(&self.status)?;
        let name = match self.full_name.filter(|n| !n.trim().is_empty()) {
            Some(full) => full,
            None => self
                .ancestor_titles
                .iter()
                .chain(std::iter::once(&self.title))
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" > "),
        };

        let (message, traceback) = if status == TestStatus::Failed {
            let joined = parser::strip_ansi(&self.failure_messages.join("\n"));
            (parser::first_line(&joined), Some(joined).filter(|s| !s.is_empty()))
        } else {
            (None, None)
        };

        let mut result = TestResult::new(name, status)
            .with_duration(parser::millis_to_secs(self.duration))
            .with_location(Some(file.to_string()), self.location.as_ref().map(|l| l.line))
            .with_error(message, traceback);
        if let Some(column) = self.location.and_then(|l| l.column) {
            result = result.with_metadata("column", column.into());
        }
        if self.status == "todo" {
            result = result.with_markers(vec!["todo".into()]);
        }
        Some(result)
    }
}

/// Jest-compatible JSON report. Shared by jest and vitest.
pub struct JestJsonParser;

impl ReportParser for JestJsonParser {
    fn name(&self) -> &'static str {
        "jest-json"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let report: JestReport = parser::report_json(raw)?;
        let mut tests = Vec::new();
        let mut skipped = 0;
        let mut window: Option<(f64, f64)> = None;

        for value in report.test_results {
            let Ok(file) = serde_json::from_value::<JestFile>(value) else {
                skipped += 1;
                continue;
            };
            let path = raw.relative_path(&file.name);

            if let (Some(start), Some(end)) = (file.start_time, file.end_time) {
                window = Some(match window {
                    Some((s, e)) => (s.min(start), e.max(end)),
                    None => (start, end),
                });
            }

            // A suite that failed to load reports no assertions, only a message.
            if file.assertion_results.is_empty()
                && file.status.as_deref() == Some("failed")
                && let Some(message) = file.message.as_deref().filter(|m| !m.trim().is_empty())
            {
                let message = parser::strip_ansi(message);
                tests.push(
                    TestResult::new(path.clone(), TestStatus::Error)
                        .with_location(Some(path.clone()), None)
                        .with_error(parser::first_line(&message), Some(message)),
                );
                continue;
            }

            let (file_tests, bad) = parser::decode_records(file.assertion_results, |a: JestAssertion| {
                a.into_result(&path)
            });
            tests.extend(file_tests);
            skipped += bad;
        }

        let duration = match (window, report.start_time) {
            (Some((_, end)), Some(start)) if end >= start => Some((end - start) / 1000.0),
            (Some((start, end)), None) if end >= start => Some((end - start) / 1000.0),
            _ => None,
        };

        Ok(ParsedReport {
            tests,
            counts: None,
            duration,
            skipped_records: skipped,
        })
    }
}

static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<mark>[✓✔√✕✖×○✎])\s+(?:(?P<kind>skipped|todo)\s+)?(?P<name>.+?)(?:\s+\((?P<ms>\d+(?:\.\d+)?)\s*ms\))?$")
        .expect("valid regex")
});

static SUITE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:PASS|FAIL)\s+(?P<file>\S+)").expect("valid regex"));

static TESTS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Tests:\s+(?P<body>.*)$").expect("valid regex"));

static TIME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Time:\s+(?P<secs>[\d.]+)\s*s").expect("valid regex"));

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<n>\d+) (?P<kind>passed|failed|skipped|todo|total)").expect("valid regex")
});

/// Reads jest's default reporter: `PASS file`, `✓ name (3 ms)` and the `Tests:` line.
pub struct JestTextParser;

impl ReportParser for JestTextParser {
    fn name(&self) -> &'static str {
        "jest-text"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let text = parser::strip_ansi(&raw.combined_text());
        let mut tests = Vec::new();
        let mut current_file: Option<String> = None;
        let mut counts = None;
        let mut duration = None;

        for line in text.lines().map(str::trim) {
            if let Some(caps) = SUITE_LINE.captures(line) {
                current_file = Some(raw.relative_path(&caps["file"]));
            } else if let Some(caps) = TESTS_LINE.captures(line) {
                counts = Some(parse_counts(&caps["body"]));
            } else if let Some(caps) = TIME_LINE.captures(line) {
                duration = caps["secs"].parse::<f64>().ok();
            } else if let Some(caps) = RESULT_LINE.captures(line) {
                let status = match &caps["mark"] {
                    "✓" | "✔" | "√" => TestStatus::Passed,
                    "✕" | "✖" | "×" => TestStatus::Failed,
                    _ => TestStatus::Skipped,
                };
                let ms = caps.name("ms").and_then(|m| m.as_str().parse::<f64>().ok());
                tests.push(
                    TestResult::new(caps["name"].trim(), status)
                        .with_duration(parser::millis_to_secs(ms))
                        .with_location(current_file.clone(), None),
                );
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

/// `1 failed, 1 skipped, 2 passed, 4 total`
pub(crate) fn parse_counts(body: &str) -> TestSummary {
    let mut summary = TestSummary::zero();
    let mut total = None;
    for caps in COUNT.captures_iter(body) {
        let n: usize = caps["n"].parse().unwrap_or(0);
        match &caps["kind"] {
            "passed" => summary.passed += n,
            "failed" => summary.failed += n,
            "skipped" | "todo" => summary.skipped += n,
            "total" => total = Some(n),
            _ => {}
        }
    }
    summary.total = total.unwrap_or(summary.passed + summary.failed + summary.skipped);
    summary.refresh_success_rate();
    summary
}
