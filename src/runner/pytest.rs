use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::{TestFramework, TestResult, TestStatus, TestSummary};

use super::parser::{self, ParseError, ParsedReport, RawOutput, ReportParser};
use super::{FrameworkAdapter, Invocation, RunRequest, split_command};

/// pytest adapter. Structured output comes from the `pytest-json-report` plugin;
/// without it the runner retries with text output only.
pub struct PytestAdapter {
    base: Vec<String>,
    structured: PytestJsonParser,
    text: PytestTextParser,
}

impl Default for PytestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PytestAdapter {
    pub fn new() -> Self {
        Self::with_command("pytest")
    }

    /// Use a different launcher, e.g. `"python -m pytest"` or `"poetry run pytest"`.
    pub fn with_command(command: &str) -> Self {
        Self {
            base: split_command(command),
            structured: PytestJsonParser,
            text: PytestTextParser,
        }
    }
}

impl FrameworkAdapter for PytestAdapter {
    fn framework(&self) -> TestFramework {
        TestFramework::Pytest
    }

    // Parallelism needs pytest-xdist, which may not be installed, so
    // `max_workers` is not forwarded.
    fn build_command(&self, request: &RunRequest, report_path: Option<&Path>) -> Invocation {
        let mut cmd = Invocation::from_base(&self.base);
        if let Some(report) = report_path {
            cmd.arg("--json-report")
                .arg(format!("--json-report-file={}", report.display()));
        }
        // -rA keeps a short per-test summary in the text output for the fallback parser.
        cmd.args(["-rA", "--color=no"]);
        if let Some(config) = &request.config_file {
            cmd.arg("-c").arg(config.to_string_lossy());
        }
        if request.verbose {
            cmd.arg("-v");
        }
        if let Some(pattern) = &request.test_pattern {
            cmd.arg("-k").arg(pattern.as_str());
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

    // pytest exits with 4 on usage errors; the argparse message names the flag.
    fn report_unsupported(&self, raw: &RawOutput) -> bool {
        raw.exit_code == Some(USAGE_ERROR_EXIT)
            && raw.report.is_none()
            && raw.combined_text().contains(UNRECOGNIZED_REPORT_FLAG)
    }
}

const USAGE_ERROR_EXIT: i32 = 4;
const UNRECOGNIZED_REPORT_FLAG: &str = "unrecognized arguments: --json-report";

// --- pytest-json-report deserialization types ---

#[derive(Debug, Deserialize)]
struct PytestReport {
    duration: Option<f64>,
    #[serde(default)]
    tests: Vec<serde_json::Value>,
    #[serde(default)]
    collectors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PytestTest {
    nodeid: String,
    outcome: String,
    lineno: Option<u32>,
    #[serde(default)]
    keywords: Vec<String>,
    setup: Option<PytestStage>,
    call: Option<PytestStage>,
    teardown: Option<PytestStage>,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PytestStage {
    duration: Option<f64>,
    outcome: Option<String>,
    crash: Option<PytestCrash>,
    longrepr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PytestCrash {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PytestCollector {
    nodeid: String,
    outcome: String,
    longrepr: Option<String>,
}

fn status_from_outcome(outcome: &str) -> Option<TestStatus> {
    match outcome.to_ascii_lowercase().as_str() {
        "passed" => Some(TestStatus::Passed),
        "failed" => Some(TestStatus::Failed),
        "skipped" => Some(TestStatus::Skipped),
        "error" | "errors" => Some(TestStatus::Error),
        "xfailed" | "xfail" => Some(TestStatus::Xfail),
        "xpassed" | "xpass" => Some(TestStatus::Xpass),
        _ => None,
    }
}

impl PytestTest {
    fn into_result(self) -> Option<TestResult> {
        let status = status_from_outcome(&self.outcome)?;
        let stages = [&self.setup, &self.call, &self.teardown];

        let timed: Vec<f64> = stages
            .iter()
            .filter_map(|s| s.as_ref().and_then(|s| s.duration))
            .collect();
        let duration = if timed.is_empty() {
            TestResult::NOT_TIMED
        } else {
            timed.iter().sum()
        };

        // The first stage that did not pass explains the outcome.
        let failing = stages.iter().filter_map(|s| s.as_ref()).find(|s| {
            s.outcome
                .as_deref()
                .is_some_and(|o| o != "passed")
                && (s.crash.is_some() || s.longrepr.is_some())
        });
        let (message, traceback) = match failing {
            Some(stage) if status != TestStatus::Passed => {
                let message = stage
                    .crash
                    .as_ref()
                    .and_then(|c| c.message.clone())
                    .or_else(|| stage.longrepr.as_deref().and_then(parser::first_line));
                (message.map(|m| parser::strip_ansi(&m)), stage.longrepr.clone())
            }
            _ => (None, None),
        };

        let (file, function) = split_nodeid(&self.nodeid);
        let path_parts: Vec<&str> = file.split('/').collect();
        let markers = self
            .keywords
            .into_iter()
            .filter(|k| {
                !k.is_empty()
                    && k != function
                    && !k.ends_with(".py")
                    && !path_parts.contains(&k.as_str())
                    && !self.nodeid.ends_with(&format!("[{}]", k))
            })
            .collect();

        let mut result = TestResult::new(self.nodeid.clone(), status)
            .with_duration(duration)
            .with_location(Some(file.to_string()), self.lineno)
            .with_error(message, traceback)
            .with_markers(markers);
        if let Some(metadata) = self.metadata {
            result = result.with_metadata("pytest", metadata);
        }
        Some(result)
    }
}

/// `tests/test_math.py::TestAdd::test_one[2-3]` -> (`tests/test_math.py`, `test_one`)
fn split_nodeid(nodeid: &str) -> (&str, &str) {
    let mut parts = nodeid.split("::");
    let file = parts.next().unwrap_or(nodeid);
    let last = parts.last().unwrap_or(file);
    let function = last.split('[').next().unwrap_or(last);
    (file, function)
}

pub struct PytestJsonParser;

impl ReportParser for PytestJsonParser {
    fn name(&self) -> &'static str {
        "pytest-json-report"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let report: PytestReport = parser::report_json(raw)?;

        let (mut tests, skipped) = parser::decode_records(report.tests, PytestTest::into_result);

        // Collection failures never produce test records; surface them as errors.
        // Passing collectors map to None, so the skip count is not meaningful here.
        let (collection_errors, _) =
            parser::decode_records(report.collectors, |c: PytestCollector| {
                if c.outcome != "failed" || c.nodeid.is_empty() {
                    return None;
                }
                let message = c.longrepr.as_deref().and_then(parser::first_line);
                Some(
                    TestResult::new(c.nodeid.clone(), TestStatus::Error)
                        .with_location(Some(c.nodeid), None)
                        .with_error(message, c.longrepr),
                )
            });
        tests.extend(collection_errors);

        Ok(ParsedReport {
            tests,
            counts: None,
            duration: report.duration,
            skipped_records: skipped,
        })
    }
}

static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<node>\S+::\S+)\s+(?P<status>PASSED|FAILED|SKIPPED|ERROR|XFAIL|XPASS)\b")
        .expect("valid regex")
});

static SHORT_SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<status>PASSED|FAILED|SKIPPED|ERROR|XFAIL|XPASS)\s+(?P<node>\S+::\S+)(?:\s+-\s+(?P<message>.*))?$")
        .expect("valid regex")
});

static FINAL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^=+ (?P<body>.*) in (?P<secs>[\d.]+)s").expect("valid regex"));

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<n>\d+) (?P<kind>passed|failed|skipped|errors?|xfailed|xpassed)")
        .expect("valid regex")
});

/// Reads `-v` result lines, the `-rA` short summary and the final count line.
pub struct PytestTextParser;

impl ReportParser for PytestTextParser {
    fn name(&self) -> &'static str {
        "pytest-text"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let text = parser::strip_ansi(&raw.combined_text());
        let mut tests: Vec<TestResult> = Vec::new();
        // node id -> position in `tests`
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut counts: Option<TestSummary> = None;
        let mut duration = None;

        for line in text.lines().map(str::trim) {
            if let Some(caps) = RESULT_LINE.captures(line) {
                let node = &caps["node"];
                if !seen.contains_key(node)
                    && let Some(status) = status_from_outcome(&caps["status"])
                {
                    let (file, _) = split_nodeid(node);
                    seen.insert(node.to_string(), tests.len());
                    tests.push(
                        TestResult::new(node, status).with_location(Some(file.to_string()), None),
                    );
                }
            } else if let Some(caps) = SHORT_SUMMARY_LINE.captures(line) {
                let node = &caps["node"];
                let message = caps.name("message").map(|m| m.as_str().to_string());
                if let Some(&index) = seen.get(node) {
                    let existing = &mut tests[index];
                    if existing.error_message.is_none() {
                        existing.error_message = message;
                    }
                } else if let Some(status) = status_from_outcome(&caps["status"]) {
                    let (file, _) = split_nodeid(node);
                    seen.insert(node.to_string(), tests.len());
                    tests.push(
                        TestResult::new(node, status)
                            .with_location(Some(file.to_string()), None)
                            .with_error(message, None),
                    );
                }
            } else if let Some(caps) = FINAL_LINE.captures(line) {
                duration = caps["secs"].parse::<f64>().ok();
                counts = Some(parse_counts(&caps["body"]));
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

fn parse_counts(body: &str) -> TestSummary {
    let mut summary = TestSummary::zero();
    for caps in COUNT.captures_iter(body) {
        let n: usize = caps["n"].parse().unwrap_or(0);
        match &caps["kind"] {
            "passed" => summary.passed += n,
            "failed" => summary.failed += n,
            "skipped" => summary.skipped += n,
            "error" | "errors" => summary.errors += n,
            "xfailed" => summary.xfail += n,
            "xpassed" => summary.xpass += n,
            _ => {}
        }
    }
    summary.total = summary.passed
        + summary.failed
        + summary.skipped
        + summary.errors
        + summary.xfail
        + summary.xpass;
    summary.refresh_success_rate();
    summary
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn raw_with_report(report: &str) -> RawOutput {
        RawOutput {
            report: Some(report.to_string()),
            ..RawOutput::default()
        }
    }

    #[test]
    fn parses_json_report_and_skips_bad_records() {
        let report = r#"{
            "duration": 0.42,
            "tests": [
                {"nodeid": "tests/test_math.py::test_add", "lineno": 3, "outcome": "passed",
                 "keywords": ["test_add", "test_math.py", "tests", "slow"],
                 "setup": {"duration": 0.001, "outcome": "passed"},
                 "call": {"duration": 0.01, "outcome": "passed"},
                 "teardown": {"duration": 0.001, "outcome": "passed"}},
                {"nodeid": "tests/test_math.py::test_div", "lineno": 9, "outcome": "failed",
                 "call": {"duration": 0.02, "outcome": "failed",
                          "crash": {"path": "tests/test_math.py", "lineno": 10, "message": "ZeroDivisionError: division by zero"},
                          "longrepr": "def test_div():\n>   1 / 0\nE   ZeroDivisionError"}},
                {"nodeid": "tests/test_math.py::test_later", "outcome": "xfailed"},
                {"nodeid": 17, "outcome": "passed"},
                {"nodeid": "tests/test_math.py::test_weird", "outcome": "exploded"}
            ],
            "collectors": [
                {"nodeid": "tests/test_broken.py", "outcome": "failed", "longrepr": "ImportError: nope"},
                {"nodeid": "", "outcome": "passed"}
            ]
        }"#;
        let parsed = PytestJsonParser.parse(&raw_with_report(report)).unwrap();

        assert_eq!(parsed.tests.len(), 4);
        assert_eq!(parsed.skipped_records, 2);
        assert_eq!(parsed.duration, Some(0.42));

        let add = &parsed.tests[0];
        assert_eq!(add.status, TestStatus::Passed);
        assert_eq!(add.file.as_deref(), Some("tests/test_math.py"));
        assert_eq!(add.line, Some(3));
        assert_eq!(add.markers, vec!["slow".to_string()]);
        assert!((add.duration - 0.012).abs() < 1e-9);

        let div = &parsed.tests[1];
        assert_eq!(div.status, TestStatus::Failed);
        assert_eq!(
            div.error_message.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
        assert!(div.error_traceback.as_deref().unwrap().contains("1 / 0"));

        assert_eq!(parsed.tests[2].status, TestStatus::Xfail);
        assert!(!parsed.tests[2].is_timed());
        assert_eq!(parsed.tests[3].status, TestStatus::Error);
        assert_eq!(parsed.tests[3].error_message.as_deref(), Some("ImportError: nope"));
    }

    #[test]
    fn missing_report_is_reported() {
        assert!(matches!(
            PytestJsonParser.parse(&RawOutput::default()),
            Err(ParseError::MissingReport)
        ));
        assert!(matches!(
            PytestJsonParser.parse(&raw_with_report("{not json")),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn text_fallback_reads_verbose_and_summary_lines() {
        let raw = RawOutput {
            stdout: "\
tests/test_a.py::test_one PASSED                                   [ 33%]
tests/test_a.py::test_two FAILED                                   [ 66%]
tests/test_a.py::test_three SKIPPED (no db)                        [100%]
=========================== short test summary info ============================
PASSED tests/test_a.py::test_one
FAILED tests/test_a.py::test_two - assert 1 == 2
==================== 1 failed, 1 passed, 1 skipped in 0.12s ====================
"
            .into(),
            ..RawOutput::default()
        };
        let parsed = PytestTextParser.parse(&raw).unwrap();
        assert_eq!(parsed.tests.len(), 3);
        assert_eq!(parsed.tests[1].error_message.as_deref(), Some("assert 1 == 2"));
        assert_eq!(parsed.duration, Some(0.12));
        let counts = parsed.counts.unwrap();
        assert_eq!((counts.total, counts.passed, counts.failed, counts.skipped), (3, 1, 1, 1));
    }

    #[test]
    fn text_fallback_accepts_bare_summary() {
        let raw = RawOutput {
            stdout: "..F\n=== 2 passed, 1 failed in 1.50s ===\n".into(),
            ..RawOutput::default()
        };
        let parsed = PytestTextParser.parse(&raw).unwrap();
        assert!(parsed.tests.is_empty());
        assert_eq!(parsed.counts.unwrap().total, 3);
    }

    #[test]
    fn builds_filtered_invocation() {
        let adapter = PytestAdapter::with_command("python -m pytest");
        let request = RunRequest::new(".")
            .test_pattern("add")
            .test_file("tests/test_math.py")
            .verbose(true);
        let cmd = adapter.build_command(&request, Some(Path::new("/tmp/r.json")));
        assert_eq!(cmd.program, "python");
        assert_eq!(
            cmd.args,
            vec![
                "-m",
                "pytest",
                "--json-report",
                "--json-report-file=/tmp/r.json",
                "-rA",
                "--color=no",
                "-v",
                "-k",
                "add",
                "tests/test_math.py",
            ]
        );
    }

    #[test]
    fn nodeid_splits_into_file_and_function() {
        assert_eq!(
            split_nodeid("tests/test_math.py::TestAdd::test_one[2-3]"),
            ("tests/test_math.py", "test_one")
        );
        assert_eq!(split_nodeid("tests/test_math.py"), ("tests/test_math.py", "tests/test_math.py"));
    }

    #[test]
    fn detects_missing_json_report_plugin() {
        let adapter = PytestAdapter::new();
        let rejected = RawOutput {
            stderr: "ERROR: usage: pytest [options] [file_or_dir] [file_or_dir] [...]\n\
                     pytest: error: unrecognized arguments: --json-report --json-report-file=/tmp/r.json\n"
                .into(),
            exit_code: Some(4),
            ..RawOutput::default()
        };
        assert!(adapter.report_unsupported(&rejected));

        let failed_tests = RawOutput {
            exit_code: Some(1),
            ..rejected.clone()
        };
        assert!(!adapter.report_unsupported(&failed_tests));
        assert!(!adapter.report_unsupported(&RawOutput::default()));
    }

    #[test]
    fn text_fallback_handles_large_suites_once_per_node() {
        let mut stdout = String::new();
        for i in 0..5000 {
            stdout.push_str(&format!("tests/test_big.py::test_{} PASSED [ 50%]\n", i));
        }
        stdout.push_str("short test summary info\n");
        for i in 0..5000 {
            stdout.push_str(&format!("PASSED tests/test_big.py::test_{}\n", i));
        }
        stdout.push_str("FAILED tests/test_big.py::test_extra - boom\n");
        stdout.push_str("==== 1 failed, 5000 passed in 3.00s ====\n");

        let parsed = PytestTextParser
            .parse(&RawOutput {
                stdout,
                ..RawOutput::default()
            })
            .unwrap();

        assert_eq!(parsed.tests.len(), 5001);
        assert_eq!(parsed.tests[4999].name, "tests/test_big.py::test_4999");
        assert_eq!(parsed.tests[5000].status, TestStatus::Failed);
        assert_eq!(parsed.tests[5000].error_message.as_deref(), Some("boom"));
    }
}
