//! Reads coverage artifacts that a test run left in the project.
//!
//! Nothing here instruments code; it only picks up `coverage.json`
//! (coverage.py), `coverage/coverage-summary.json` (istanbul) and lcov
//! tracefiles when they are fresher than the run.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use serde::Deserialize;

use crate::models::CoverageInfo;

const CANDIDATES: [(&str, Format); 4] = [
    ("coverage.json", Format::CoveragePy),
    ("coverage/coverage-summary.json", Format::Istanbul),
    ("coverage/lcov.info", Format::Lcov),
    ("lcov.info", Format::Lcov),
];

#[derive(Debug, Clone, Copy)]
enum Format {
    CoveragePy,
    Istanbul,
    Lcov,
}

/// Find and parse the first coverage artifact modified at or after `since`.
pub fn discover(project: &Path, since: SystemTime) -> Option<CoverageInfo> {
    CANDIDATES.iter().find_map(|(relative, format)| {
        let path = project.join(relative);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        if modified < since {
            return None;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        let parsed = parse(&content, *format);
        if parsed.is_none() {
            tracing::warn!(path = %path.display(), "unreadable coverage artifact");
        }
        parsed
    })
}

fn parse(content: &str, format: Format) -> Option<CoverageInfo> {
    match format {
        Format::CoveragePy => parse_coverage_py(content),
        Format::Istanbul => parse_istanbul(content),
        Format::Lcov => parse_lcov(content),
    }
}

#[derive(Debug, Deserialize)]
struct CoveragePyReport {
    totals: CoveragePyTotals,
    #[serde(default)]
    files: BTreeMap<String, CoveragePyFile>,
}

#[derive(Debug, Deserialize)]
struct CoveragePyTotals {
    covered_lines: u64,
    num_statements: u64,
    percent_covered: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CoveragePyFile {
    #[serde(default)]
    missing_lines: Vec<u64>,
}

fn parse_coverage_py(content: &str) -> Option<CoverageInfo> {
    let report: CoveragePyReport = serde_json::from_str(content).ok()?;
    let mut info = CoverageInfo::from_counts(report.totals.covered_lines, report.totals.num_statements);
    if let Some(percent) = report.totals.percent_covered {
        info.coverage_percent = percent;
    }
    let missing: Vec<String> = report
        .files
        .iter()
        .flat_map(|(file, data)| data.missing_lines.iter().map(move |l| format!("{}:{}", file, l)))
        .collect();
    info.missing_lines = Some(missing);
    Some(info)
}

#[derive(Debug, Deserialize)]
struct IstanbulSummary {
    total: IstanbulTotal,
}

#[derive(Debug, Deserialize)]
struct IstanbulTotal {
    lines: IstanbulMetric,
}

#[derive(Debug, Deserialize)]
struct IstanbulMetric {
    total: u64,
    covered: u64,
    pct: Option<serde_json::Value>,
}

fn parse_istanbul(content: &str) -> Option<CoverageInfo> {
    let summary: IstanbulSummary = serde_json::from_str(content).ok()?;
    let lines = summary.total.lines;
    let mut info = CoverageInfo::from_counts(lines.covered, lines.total);
    // istanbul writes "Unknown" for pct when there are no lines.
    if let Some(pct) = lines.pct.and_then(|p| p.as_f64()) {
        info.coverage_percent = pct;
    }
    Some(info)
}

fn parse_lcov(content: &str) -> Option<CoverageInfo> {
    let mut found = 0u64;
    let mut hit = 0u64;
    let mut missing = Vec::new();
    let mut current_file = String::new();
    let mut saw_record = false;

    for line in content.lines().map(str::trim) {
        if let Some(file) = line.strip_prefix("SF:") {
            current_file = file.to_string();
            saw_record = true;
        } else if let Some(n) = line.strip_prefix("LF:") {
            found += n.parse::<u64>().unwrap_or(0);
        } else if let Some(n) = line.strip_prefix("LH:") {
            hit += n.parse::<u64>().unwrap_or(0);
        } else if let Some(da) = line.strip_prefix("DA:") {
            let mut parts = da.split(',');
            if let (Some(line_no), Some(count)) = (parts.next(), parts.next())
                && count.trim() == "0"
            {
                missing.push(format!("{}:{}", current_file, line_no));
            }
        }
    }

    if !saw_record {
        return None;
    }
    let mut info = CoverageInfo::from_counts(hit, found);
    info.missing_lines = Some(missing);
    Some(info)
}
