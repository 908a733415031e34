use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::{TestFramework, TestResult, TestStatus, TestSummary};

use super::parser::{self, ParseError, ParsedReport, RawOutput, ReportParser};
use super::{FrameworkAdapter, Invocation, RunRequest, split_command};

/// `cargo test` adapter.
///
/// Stable libtest has no report file, so the structured stage reads libtest
/// JSON events from stdout when present (nightly `--format json`), and the
/// text stage reads the default `test name ... ok` lines otherwise.
pub struct CargoAdapter {
    base: Vec<String>,
    structured: LibtestJsonParser,
    text: CargoTextParser,
}

impl Default for CargoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CargoAdapter {
    pub fn new() -> Self {
        Self::with_command("cargo test")
    }

    pub fn with_command(command: &str) -> Self {
        Self {
            base: split_command(command),
            structured: LibtestJsonParser,
            text: CargoTextParser,
        }
    }
}

impl FrameworkAdapter for CargoAdapter {
    fn framework(&self) -> TestFramework {
        TestFramework::Cargo
    }

    fn report_extension(&self) -> Option<&'static str> {
        None
    }

    fn build_command(&self, request: &RunRequest, _report_path: Option<&Path>) -> Invocation {
        let mut cmd = Invocation::from_base(&self.base);
        cmd.arg("--color=never");
        if let Some(manifest) = &request.config_file {
            cmd.arg("--manifest-path").arg(manifest.to_string_lossy());
        }
        // `tests/api.rs` -> `--test api`
        if let Some(file) = &request.test_file {
            let target = Path::new(file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file.clone());
            cmd.arg("--test").arg(target);
        }
        if let Some(pattern) = &request.test_pattern {
            cmd.arg(pattern.as_str());
        }
        cmd.arg("--")
            .arg(format!("--test-threads={}", request.max_workers));
        if request.verbose {
            cmd.arg("--nocapture");
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

// --- libtest JSON event types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LibtestEvent {
    Suite {
        event: String,
        exec_time: Option<f64>,
    },
    Test {
        event: String,
        name: String,
        exec_time: Option<f64>,
        stdout: Option<String>,
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

pub struct LibtestJsonParser;

impl ReportParser for LibtestJsonParser {
    fn name(&self) -> &'static str {
        "libtest-json"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let mut tests = Vec::new();
        let mut skipped = 0;
        let mut saw_events = false;
        let mut duration: Option<f64> = None;

        for line in raw.stdout.lines().map(str::trim) {
            if !line.starts_with('{') {
                continue;
            }
            let event = match serde_json::from_str::<LibtestEvent>(line) {
                Ok(event) => event,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            saw_events = true;
            match event {
                LibtestEvent::Suite { event, exec_time } if event != "started" => {
                    if let Some(t) = exec_time {
                        duration = Some(duration.unwrap_or(0.0) + t);
                    }
                }
                LibtestEvent::Test {
                    event,
                    name,
                    exec_time,
                    stdout,
                    message,
                } => {
                    let status = match event.as_str() {
                        "ok" => TestStatus::Passed,
                        "failed" | "timeout" => TestStatus::Failed,
                        "ignored" => TestStatus::Skipped,
                        _ => continue,
                    };
                    let mut result = TestResult::new(name, status)
                        .with_duration(exec_time.unwrap_or(TestResult::NOT_TIMED));
                    if status == TestStatus::Failed {
                        let details = stdout.map(|s| parser::strip_ansi(&s));
                        let summary = message
                            .clone()
                            .or_else(|| details.as_deref().and_then(panic_message));
                        result = result.with_error(summary, details);
                    } else if status == TestStatus::Skipped && message.is_some() {
                        result = result.with_metadata("reason", message.unwrap_or_default().into());
                    }
                    tests.push(result);
                }
                _ => {}
            }
        }

        if !saw_events {
            return Err(ParseError::MissingReport);
        }
        Ok(ParsedReport {
            tests,
            counts: None,
            duration,
            skipped_records: skipped,
        })
    }
}

static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test (?P<name>\S+)(?: - should panic)? \.\.\. (?P<outcome>ok|FAILED|ignored)(?:, (?P<reason>.+))?$")
        .expect("valid regex")
});

static RESULT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test result: \w+\. (?P<passed>\d+) passed; (?P<failed>\d+) failed; (?P<ignored>\d+) ignored;.*finished in (?P<secs>[\d.]+)s")
        .expect("valid regex")
});

static FAILURE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---- (?P<name>\S+) stdout ----$").expect("valid regex"));

/// First `panicked at` explanation in a captured failure section.
fn panic_message(section: &str) -> Option<String> {
    let mut lines = section.lines();
    while let Some(line) = lines.next() {
        if line.contains("panicked at") {
            // Newer toolchains put the message on the following line.
            return match line.split_once("panicked at ").map(|(_, rest)| rest) {
                Some(rest) if rest.trim_end().ends_with(':') => {
                    lines.next().map(|l| l.trim().to_string())
                }
                Some(rest) => Some(rest.trim().to_string()),
                None => Some(line.trim().to_string()),
            };
        }
    }
    parser::first_line(section)
}

/// Reads the default libtest output, across every test binary cargo ran.
pub struct CargoTextParser;

impl ReportParser for CargoTextParser {
    fn name(&self) -> &'static str {
        "cargo-text"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let text = parser::strip_ansi(&raw.combined_text());
        let mut tests: Vec<TestResult> = Vec::new();
        let mut counts: Option<TestSummary> = None;
        let mut duration: Option<f64> = None;
        let mut failure_sections: Vec<(String, Vec<&str>)> = Vec::new();
        let mut in_section = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(caps) = FAILURE_HEADER.captures(trimmed) {
                failure_sections.push((caps["name"].to_string(), Vec::new()));
                in_section = true;
                continue;
            }
            if in_section {
                if trimmed == "failures:" || trimmed.starts_with("test result:") {
                    in_section = false;
                } else if let Some((_, body)) = failure_sections.last_mut() {
                    body.push(line);
                    continue;
                }
            }

            if let Some(caps) = RESULT_LINE.captures(trimmed) {
                let status = match &caps["outcome"] {
                    "ok" => TestStatus::Passed,
                    "FAILED" => TestStatus::Failed,
                    _ => TestStatus::Skipped,
                };
                let mut result = TestResult::new(&caps["name"], status);
                if let Some(reason) = caps.name("reason") {
                    result = result.with_metadata("reason", reason.as_str().into());
                }
                tests.push(result);
            } else if let Some(caps) = RESULT_SUMMARY.captures(trimmed) {
                let summary = counts.get_or_insert_with(TestSummary::zero);
                summary.passed += caps["passed"].parse::<usize>().unwrap_or(0);
                summary.failed += caps["failed"].parse::<usize>().unwrap_or(0);
                summary.skipped += caps["ignored"].parse::<usize>().unwrap_or(0);
                summary.total = summary.passed + summary.failed + summary.skipped;
                summary.refresh_success_rate();
                if let Ok(secs) = caps["secs"].parse::<f64>() {
                    duration = Some(duration.unwrap_or(0.0) + secs);
                }
            }
        }

        for (name, body) in failure_sections {
            let section = body.join("\n").trim().to_string();
            if let Some(test) = tests.iter_mut().find(|t| t.name == name) {
                test.error_message = panic_message(&section);
                test.error_traceback = Some(section).filter(|s| !s.is_empty());
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn text_fallback_reads_libtest_output() {
        let raw = RawOutput {
            stdout: "\
running 3 tests
test math::adds ... ok
test math::divides ... FAILED
test math::slow ... ignored, needs network

failures:

---- math::divides stdout ----

thread 'math::divides' panicked at src/math.rs:10:5:
attempt to divide by zero
note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace


failures:
    math::divides

test result: FAILED. 1 passed; 1 failed; 1 ignored; 0 measured; 0 filtered out; finished in 0.01s
"
            .into(),
            ..RawOutput::default()
        };
        let parsed = CargoTextParser.parse(&raw).unwrap();
        assert_eq!(parsed.tests.len(), 3);
        assert_eq!(parsed.tests[1].status, TestStatus::Failed);
        assert_eq!(
            parsed.tests[1].error_message.as_deref(),
            Some("attempt to divide by zero")
        );
        assert_eq!(parsed.tests[2].status, TestStatus::Skipped);
        assert_eq!(parsed.tests[2].metadata["reason"], "needs network");
        assert_eq!(parsed.duration, Some(0.01));
        assert_eq!(parsed.counts.unwrap().total, 3);
    }

    #[test]
    fn structured_stage_reads_json_events() {
        let raw = RawOutput {
            stdout: r#"{ "type": "suite", "event": "started", "test_count": 2 }
{ "type": "test", "event": "started", "name": "a" }
{ "type": "test", "name": "a", "event": "ok", "exec_time": 0.003 }
{ "type": "test", "name": "b", "event": "failed", "stdout": "thread 'b' panicked at src/lib.rs:4:5:\nboom\n" }
{ "type": "test", "name":
{ "type": "suite", "event": "failed", "passed": 1, "failed": 1, "exec_time": 0.01 }
"#
            .into(),
            ..RawOutput::default()
        };
        let parsed = LibtestJsonParser.parse(&raw).unwrap();
        assert_eq!(parsed.tests.len(), 2);
        assert_eq!(parsed.skipped_records, 1);
        assert_eq!(parsed.tests[0].duration, 0.003);
        assert_eq!(parsed.tests[1].error_message.as_deref(), Some("boom"));
        assert_eq!(parsed.duration, Some(0.01));
    }

    #[test]
    fn plain_output_has_no_structured_report() {
        let raw = RawOutput {
            stdout: "test a ... ok\n".into(),
            ..RawOutput::default()
        };
        assert!(matches!(
            LibtestJsonParser.parse(&raw),
            Err(ParseError::MissingReport)
        ));
    }

    #[test]
    fn maps_test_file_to_target() {
        let request = RunRequest::new(".")
            .test_file("tests/api.rs")
            .test_pattern("login")
            .max_workers(1);
        let cmd = CargoAdapter::new().build_command(&request, None);
        assert_eq!(
            cmd.args,
            vec!["test", "--color=never", "--test", "api", "login", "--", "--test-threads=1"]
        );
    }
}
