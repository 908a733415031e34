//! Read-only statistics over one or more run results.
//!
//! Nothing here mutates its input or touches the filesystem, so every function
//! is safe to call from any number of tasks at once.

mod flaky;
mod health;
mod performance;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{TestResult, TestStatus, UnifiedTestResults};

pub use flaky::{FlakyTest, detect_flaky_tests};
pub use health::{HealthGrade, HealthReport, HealthStatus, validate_test_health};
pub use performance::{DEFAULT_TOP_N, PerformanceReport, TestTiming, analyze_performance};

/// Key used by [`get_test_distribution_by_file`] for tests without a file.
pub const UNKNOWN_FILE: &str = "<unknown>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    /// Share of tests that passed. A proxy, not line coverage.
    pub coverage_percentage: f64,
    pub coverage_available: bool,
    /// Line coverage from a coverage artifact, when the run found one.
    pub line_coverage_percentage: Option<f64>,
    pub message: Option<String>,
}

/// Coverage proxy: the share of tests that passed.
pub fn analyze_coverage(result: &UnifiedTestResults) -> CoverageReport {
    let summary = &result.summary;
    let line_coverage_percentage = result.coverage.as_ref().map(|c| c.coverage_percent);

    if summary.total == 0 {
        return CoverageReport {
            total_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            skipped_tests: 0,
            coverage_percentage: 0.0,
            coverage_available: false,
            line_coverage_percentage,
            message: Some("No tests found; coverage cannot be estimated".to_string()),
        };
    }

    CoverageReport {
        total_tests: summary.total,
        passed_tests: summary.passed,
        failed_tests: summary.failed,
        skipped_tests: summary.skipped,
        coverage_percentage: summary.passed as f64 / summary.total as f64 * 100.0,
        coverage_available: true,
        line_coverage_percentage,
        message: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Improvement,
    Regression,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub trend: Trend,
    /// Signed; negative means fewer failures than before.
    pub new_failures: i64,
    pub fixed_tests: usize,
    pub pass_rate_change: f64,
    /// Tests that passed before and fail now.
    pub newly_failing: Vec<String>,
}

/// Two-way trend between an earlier and a later run.
pub fn compare_results(before: &UnifiedTestResults, after: &UnifiedTestResults) -> TrendReport {
    let new_failures = after.summary.failed as i64 - before.summary.failed as i64;
    let pass_rate_change = after.summary.success_rate - before.summary.success_rate;

    let before_status: BTreeMap<&str, TestStatus> = before
        .tests
        .iter()
        .map(|t| (t.name.as_str(), t.status))
        .collect();

    let mut fixed_tests = 0;
    let mut newly_failing = Vec::new();
    for test in &after.tests {
        let Some(prev) = before_status.get(test.name.as_str()) else {
            continue;
        };
        if prev.is_failure() && test.status.is_pass() {
            fixed_tests += 1;
        } else if prev.is_pass() && test.status.is_failure() {
            newly_failing.push(test.name.clone());
        }
    }

    let trend = if new_failures < 0 || (new_failures == 0 && pass_rate_change > 0.0) {
        Trend::Improvement
    } else if new_failures > 0 || (new_failures == 0 && pass_rate_change < 0.0) {
        Trend::Regression
    } else {
        Trend::Stable
    };

    TrendReport {
        trend,
        new_failures,
        fixed_tests,
        pass_rate_change,
        newly_failing,
    }
}

/// Failed and errored tests, in run order.
pub fn get_failing_tests(result: &UnifiedTestResults) -> Vec<&TestResult> {
    result
        .tests
        .iter()
        .filter(|t| t.status.is_failure())
        .collect()
}

/// Test count per status. Every status is present, zero or not.
pub fn get_test_distribution_by_status(result: &UnifiedTestResults) -> BTreeMap<TestStatus, usize> {
    let mut distribution: BTreeMap<TestStatus, usize> =
        TestStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for test in &result.tests {
        *distribution.entry(test.status).or_default() += 1;
    }
    distribution
}

pub fn get_test_distribution_by_file(result: &UnifiedTestResults) -> BTreeMap<String, usize> {
    let mut distribution = BTreeMap::new();
    for test in &result.tests {
        let file = test.file.as_deref().unwrap_or(UNKNOWN_FILE);
        *distribution.entry(file.to_string()).or_default() += 1;
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrameworkInfo, TestFramework};

    fn run(tests: Vec<TestResult>) -> UnifiedTestResults {
        UnifiedTestResults::from_tests("demo", FrameworkInfo::new(TestFramework::Pytest), tests)
    }

    #[test]
    fn coverage_of_empty_run_is_unavailable() {
        let report = analyze_coverage(&run(Vec::new()));
        assert_eq!(report.coverage_percentage, 0.0);
        assert!(!report.coverage_available);
        assert!(report.message.is_some());
    }

    #[test]
    fn coverage_is_passed_over_total() {
        let report = analyze_coverage(&run(vec![
            TestResult::new("a", TestStatus::Passed),
            TestResult::new("b", TestStatus::Passed),
            TestResult::new("c", TestStatus::Failed),
            TestResult::new("d", TestStatus::Skipped),
        ]));
        assert_eq!(report.coverage_percentage, 50.0);
        assert!(report.coverage_available);
        assert_eq!(report.line_coverage_percentage, None);
    }

    #[test]
    fn identical_runs_are_stable() {
        let a = run(vec![TestResult::new("a", TestStatus::Passed)]);
        let report = compare_results(&a, &a);
        assert_eq!(report.trend, Trend::Stable);
        assert_eq!(report.new_failures, 0);
        assert_eq!(report.fixed_tests, 0);
    }

    #[test]
    fn fixing_a_test_is_an_improvement() {
        let before = run(vec![
            TestResult::new("a", TestStatus::Failed),
            TestResult::new("b", TestStatus::Error),
        ]);
        let after = run(vec![
            TestResult::new("a", TestStatus::Passed),
            TestResult::new("b", TestStatus::Passed),
        ]);
        let report = compare_results(&before, &after);
        assert_eq!(report.trend, Trend::Improvement);
        assert_eq!(report.new_failures, -1);
        assert_eq!(report.fixed_tests, 2);
        assert_eq!(report.pass_rate_change, 100.0);
    }

    #[test]
    fn trend_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Trend::Regression).unwrap(), "\"REGRESSION\"");
    }

    #[test]
    fn status_distribution_lists_every_status() {
        let distribution =
            get_test_distribution_by_status(&run(vec![TestResult::new("a", TestStatus::Xfail)]));
        assert_eq!(distribution.len(), TestStatus::ALL.len());
        assert_eq!(distribution[&TestStatus::Xfail], 1);
        assert_eq!(distribution[&TestStatus::Passed], 0);
    }

    #[test]
    fn file_distribution_groups_unknown_files() {
        let distribution = get_test_distribution_by_file(&run(vec![
            TestResult::new("a", TestStatus::Passed).with_location(Some("t.py".into()), None),
            TestResult::new("b", TestStatus::Failed).with_location(Some("t.py".into()), Some(3)),
            TestResult::new("c", TestStatus::Passed),
        ]));
        assert_eq!(distribution["t.py"], 2);
        assert_eq!(distribution[UNKNOWN_FILE], 1);
    }
}
