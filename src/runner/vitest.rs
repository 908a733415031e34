use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{TestFramework, TestResult, TestStatus, TestSummary};

use super::jest::JestJsonParser;
use super::parser::{self, ParseError, ParsedReport, RawOutput, ReportParser};
use super::{FrameworkAdapter, Invocation, RunRequest, split_command};

/// Vitest adapter. Vitest's `json` reporter writes a jest-compatible report,
/// so the structured stage is shared with [`super::jest`].
pub struct VitestAdapter {
    base: Vec<String>,
    structured: JestJsonParser,
    text: VitestTextParser,
}

impl Default for VitestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VitestAdapter {
    pub fn new() -> Self {
        Self::with_command("npx vitest")
    }

    pub fn with_command(command: &str) -> Self {
        Self {
            base: split_command(command),
            structured: JestJsonParser,
            text: VitestTextParser,
        }
    }
}

impl FrameworkAdapter for VitestAdapter {
    fn framework(&self) -> TestFramework {
        TestFramework::Vitest
    }

    fn build_command(&self, request: &RunRequest, report_path: Option<&Path>) -> Invocation {
        let mut cmd = Invocation::from_base(&self.base);
        // `run` keeps vitest out of watch mode.
        cmd.arg("run").arg("--includeTaskLocation");
        if let Some(report) = report_path {
            cmd.arg("--reporter=json")
                .arg(format!("--outputFile={}", report.display()));
        }
        // A text reporter alongside json keeps the fallback parser fed.
        cmd.arg(if request.verbose {
            "--reporter=verbose"
        } else {
            "--reporter=default"
        });
        cmd.arg(format!("--maxWorkers={}", request.max_workers));
        if let Some(config) = &request.config_file {
            cmd.arg("--config").arg(config.to_string_lossy());
        }
        if let Some(pattern) = &request.test_pattern {
            cmd.arg("-t").arg(pattern.as_str());
        }
        if let Some(file) = &request.test_file {
            cmd.arg(file.as_str());
        }
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn structured_parser(&self) -> &dyn ReportParser {
        &self.structured
    }

    fn text_parser(&self) -> &dyn ReportParser {
        &self.text
    }
}

static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<mark>[✓✔×✗↓])\s+(?P<name>.+?)(?:\s+(?P<ms>\d+(?:\.\d+)?)\s*ms)?(?:\s+\[skipped\])?$")
        .expect("valid regex")
});

/// File-level lines in the default reporter: `✓ src/a.test.ts (3 tests) 5ms`.
static FILE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\d+ tests?(?: \| \d+ \w+)*\)").expect("valid regex"));

static TESTS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Tests\s+(?P<body>.*)$").expect("valid regex"));

static DURATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Duration\s+(?P<n>[\d.]+)(?P<unit>ms|s)").expect("valid regex"));

static COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<n>\d+) (?P<kind>passed|failed|skipped|todo)|\((?P<total>\d+)\)")
        .expect("valid regex")
});

/// Reads vitest's default/verbose reporters: `✓ file > suite > name 2ms`,
/// `× ...`, `↓ ... [skipped]` and the `Tests  1 failed | 2 passed (3)` line.
pub struct VitestTextParser;

impl ReportParser for VitestTextParser {
    fn name(&self) -> &'static str {
        "vitest-text"
    }

    fn parse(&self, raw: &RawOutput) -> Result<ParsedReport, ParseError> {
        let text = parser::strip_ansi(&raw.combined_text());
        let mut tests = Vec::new();
        let mut counts = None;
        let mut duration = None;

        for line in text.lines().map(str::trim) {
            if let Some(caps) = TESTS_LINE.captures(line) {
                counts = Some(parse_counts(&caps["body"]));
            } else if let Some(caps) = DURATION_LINE.captures(line) {
                let n = caps["n"].parse::<f64>().ok();
                duration = match &caps["unit"] {
                    "ms" => n.map(|ms| ms / 1000.0),
                    _ => n,
                };
            } else if FILE_LINE.is_match(line) {
                continue;
            } else if let Some(caps) = RESULT_LINE.captures(line) {
                let status = match &caps["mark"] {
                    "✓" | "✔" => TestStatus::Passed,
                    "×" | "✗" => TestStatus::Failed,
                    _ => TestStatus::Skipped,
                };
                let full = caps["name"].trim();
                // `src/a.test.ts > suite > name`: the first segment is the file.
                let (file, name) = match full.split_once(" > ") {
                    Some((file, rest)) if looks_like_path(file) => {
                        (Some(raw.relative_path(file)), rest)
                    }
                    _ => (None, full),
                };
                let ms = caps.name("ms").and_then(|m| m.as_str().parse::<f64>().ok());
                tests.push(
                    TestResult::new(name, status)
                        .with_duration(parser::millis_to_secs(ms))
                        .with_location(file, None),
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

fn looks_like_path(segment: &str) -> bool {
    let segment = segment.trim();
    !segment.contains(' ')
        && [".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".mts", ".cts"]
            .iter()
            .any(|ext| segment.ends_with(ext))
}

/// `1 failed | 2 passed | 1 skipped (4)`
fn parse_counts(body: &str) -> TestSummary {
    let mut summary = TestSummary::zero();
    let mut total = None;
    for caps in COUNT.captures_iter(body) {
        if let Some(t) = caps.name("total") {
            total = t.as_str().parse().ok();
            continue;
        }
        let n: usize = caps["n"].parse().unwrap_or(0);
        match &caps["kind"] {
            "passed" => summary.passed += n,
            "failed" => summary.failed += n,
            "skipped" | "todo" => summary.skipped += n,
            _ => {}
        }
    }
    summary.total = total.unwrap_or(summary.passed + summary.failed + summary.skipped);
    summary.refresh_success_rate();
    summary
}
