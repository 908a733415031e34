pub mod archive;
pub mod export;

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{
    CoverageInfo, FrameworkInfo, TestFramework, TestStatus, TestSummary, UnifiedTestResults,
};

pub use archive::{Archive, ArchiveEntry};
pub use export::{ExportFormat, export_results};

/// Combine results from several runs into one.
///
/// Counts and durations are summed and the success rate is recomputed from the
/// sums. Tests are concatenated in input order. The first input's framework is
/// kept for provenance; an empty input yields the all-zero value.
pub fn aggregate_results(results: &[UnifiedTestResults]) -> UnifiedTestResults {
    let Some(first) = results.first() else {
        return UnifiedTestResults::from_tests(
            "aggregate",
            FrameworkInfo::new(TestFramework::Unknown),
            Vec::new(),
        );
    };
    if results.len() == 1 {
        return first.clone();
    }

    let mut summary = TestSummary::zero();
    let mut tests = Vec::with_capacity(results.iter().map(|r| r.tests.len()).sum());
    let mut errors = Vec::new();
    let mut coverage: Option<CoverageInfo> = None;

    for result in results {
        summary.merge(&result.summary);
        tests.extend(result.tests.iter().cloned());
        if let Some(error) = &result.error {
            errors.push(format!("{}: {}", result.project, error));
        }
        if let Some(c) = &result.coverage {
            let merged = coverage.get_or_insert_with(|| CoverageInfo::from_counts(0, 0));
            let mut missing = merged.missing_lines.take().unwrap_or_default();
            missing.extend(c.missing_lines.iter().flatten().cloned());
            *merged = CoverageInfo::from_counts(
                merged.covered_lines + c.covered_lines,
                merged.total_lines + c.total_lines,
            );
            merged.missing_lines = Some(missing);
        }
    }

    let mut projects: Vec<&str> = Vec::new();
    for result in results {
        if !projects.contains(&result.project.as_str()) {
            projects.push(&result.project);
        }
    }

    UnifiedTestResults {
        project: projects.join("+"),
        framework: first.framework.clone(),
        summary,
        tests,
        coverage,
        error: (!errors.is_empty()).then(|| errors.join("\n")),
        environment: first.environment.clone(),
        timestamp: Utc::now(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub before_status: TestStatus,
    pub after_status: TestStatus,
}

/// Difference between two result sets, keyed by test name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDiff {
    pub total_change: i64,
    pub passed_change: i64,
    pub failed_change: i64,
    pub improvement: bool,
    pub regression: bool,
    pub status_changes: BTreeMap<String, StatusChange>,
    pub new_tests: Vec<String>,
    pub removed_tests: Vec<String>,
}

fn delta(after: usize, before: usize) -> i64 {
    after as i64 - before as i64
}

/// Compare two runs. Only status drives the per-test diff; timing changes
/// are ignored.
pub fn compare_results(before: &UnifiedTestResults, after: &UnifiedTestResults) -> ResultDiff {
    let total_change = delta(after.summary.total, before.summary.total);
    let passed_change = delta(after.summary.passed, before.summary.passed);
    let failed_change = delta(after.summary.failed, before.summary.failed);

    let before_status: HashMap<&str, TestStatus> = before
        .tests
        .iter()
        .map(|t| (t.name.as_str(), t.status))
        .collect();
    let after_status: HashMap<&str, TestStatus> = after
        .tests
        .iter()
        .map(|t| (t.name.as_str(), t.status))
        .collect();

    let mut status_changes = BTreeMap::new();
    let mut new_tests = Vec::new();
    for test in &after.tests {
        match before_status.get(test.name.as_str()) {
            Some(&prev) if prev != test.status => {
                status_changes.insert(
                    test.name.clone(),
                    StatusChange {
                        before_status: prev,
                        after_status: test.status,
                    },
                );
            }
            Some(_) => {}
            None if !new_tests.contains(&test.name) => new_tests.push(test.name.clone()),
            None => {}
        }
    }

    let mut removed_tests = Vec::new();
    for test in &before.tests {
        if !after_status.contains_key(test.name.as_str()) && !removed_tests.contains(&test.name) {
            removed_tests.push(test.name.clone());
        }
    }

    ResultDiff {
        total_change,
        passed_change,
        failed_change,
        improvement: failed_change < 0 || (passed_change > 0 && failed_change <= 0),
        regression: failed_change > 0,
        status_changes,
        new_tests,
        removed_tests,
    }
}
