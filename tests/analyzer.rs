use pretty_assertions::assert_eq;
use rstest::rstest;

use testlens::analyzer::{
    self, DEFAULT_TOP_N, HealthGrade, HealthStatus, Trend, analyze_coverage, analyze_performance,
    detect_flaky_tests, validate_test_health,
};
use testlens::{Archive, FrameworkInfo, TestFramework, TestResult, TestStatus, UnifiedTestResults};

fn run(statuses: &[(&str, TestStatus)]) -> UnifiedTestResults {
    let tests = statuses
        .iter()
        .map(|(name, status)| TestResult::new(*name, *status))
        .collect();
    UnifiedTestResults::from_tests("suite", FrameworkInfo::new(TestFramework::Vitest), tests)
}

fn run_of(passed: usize, failed: usize, errors: usize, skipped: usize) -> UnifiedTestResults {
    let tests = [
        (TestStatus::Passed, passed),
        (TestStatus::Failed, failed),
        (TestStatus::Error, errors),
        (TestStatus::Skipped, skipped),
    ]
    .into_iter()
    .flat_map(|(status, n)| std::iter::repeat_n(status, n))
    .enumerate()
    .map(|(i, status)| TestResult::new(format!("t{}", i), status))
    .collect();
    UnifiedTestResults::from_tests("suite", FrameworkInfo::new(TestFramework::Vitest), tests)
}

#[rstest]
#[case(2)]
#[case(5)]
fn identical_passing_runs_have_no_flaky_tests(#[case] n: usize) {
    let snapshot = run(&[("a", TestStatus::Passed), ("b", TestStatus::Passed)]);
    let history = vec![snapshot; n];
    assert!(detect_flaky_tests(&history).is_empty());
}

#[rstest]
#[case(2)]
#[case(3)]
#[case(6)]
fn alternating_test_is_flaky(#[case] n: usize) {
    let history: Vec<UnifiedTestResults> = (0..n)
        .map(|i| {
            let status = if i % 2 == 0 {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            run(&[("stable", TestStatus::Passed), ("wobbly", status)])
        })
        .collect();

    let flaky = detect_flaky_tests(&history);

    assert_eq!(flaky.keys().collect::<Vec<_>>(), vec!["wobbly"]);
    let wobbly = &flaky["wobbly"];
    assert_eq!(wobbly.total_runs, n);
    assert_eq!(wobbly.passed_runs + wobbly.failed_runs, n);
    assert_eq!(wobbly.status_history.len(), n);
    assert_eq!(wobbly.status_history[0], TestStatus::Passed);
}

#[test]
fn flaky_detection_reads_archived_history() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    for status in [TestStatus::Passed, TestStatus::Error, TestStatus::Passed] {
        archive
            .archive_results(&run(&[("net", status)]), None, Some("ci"))
            .unwrap();
    }

    let history: Vec<UnifiedTestResults> = archive
        .get_result_history(10)
        .unwrap()
        .into_iter()
        .map(|entry| entry.results)
        .collect();
    let flaky = detect_flaky_tests(&history);

    assert_eq!(flaky["net"].total_runs, 3);
    assert_eq!(flaky["net"].passed_runs, 2);
    assert_eq!(flaky["net"].failed_runs, 1);
}

#[test]
fn empty_run_never_divides_by_zero() {
    let empty = run(&[]);

    let coverage = analyze_coverage(&empty);
    assert_eq!(coverage.coverage_percentage, 0.0);
    assert!(!coverage.coverage_available);
    assert!(coverage.message.is_some());

    let performance = analyze_performance(&empty, DEFAULT_TOP_N);
    assert_eq!(performance.total_duration_seconds, 0.0);
    assert_eq!(performance.p99_duration_seconds, 0.0);
    assert!(performance.slowest_tests.is_empty());

    let health = validate_test_health(&empty);
    assert_eq!(health.health_grade, HealthGrade::F);
    assert_eq!(health.status, HealthStatus::Failing);
}

#[rstest]
#[case(run_of(10, 0, 0, 0), HealthGrade::A, HealthStatus::Healthy)]
#[case(run_of(9, 1, 0, 0), HealthGrade::B, HealthStatus::Failing)]
#[case(run_of(9, 0, 1, 0), HealthGrade::C, HealthStatus::Failing)]
#[case(run_of(3, 1, 0, 0), HealthGrade::D, HealthStatus::Failing)]
#[case(run_of(5, 3, 2, 0), HealthGrade::F, HealthStatus::Failing)]
fn health_grades(
    #[case] result: UnifiedTestResults,
    #[case] grade: HealthGrade,
    #[case] status: HealthStatus,
) {
    let health = validate_test_health(&result);
    assert_eq!(health.health_grade, grade);
    assert_eq!(health.status, status);
    assert!((0.0..=100.0).contains(&health.health_score));
}

#[test]
fn errors_weigh_at_least_as_much_as_failures() {
    let failed = validate_test_health(&run_of(6, 4, 0, 0));
    let errored = validate_test_health(&run_of(6, 0, 4, 0));
    assert!(errored.health_score <= failed.health_score);
    assert_eq!(errored.error_rate_percentage, 40.0);
    assert_eq!(failed.pass_rate_percentage, 60.0);
}

#[rstest]
#[case(run_of(5, 0, 0, 0), run_of(3, 2, 0, 0), Trend::Regression, 2)]
#[case(run_of(3, 2, 0, 0), run_of(5, 0, 0, 0), Trend::Improvement, -2)]
#[case(run_of(4, 1, 0, 0), run_of(4, 1, 0, 0), Trend::Stable, 0)]
#[case(run_of(4, 0, 0, 0), run_of(3, 0, 0, 1), Trend::Stable, 0)]
#[case(run_of(4, 1, 0, 0), run_of(5, 1, 0, 0), Trend::Improvement, 0)]
fn trend_follows_failures_then_pass_rate(
    #[case] before: UnifiedTestResults,
    #[case] after: UnifiedTestResults,
    #[case] trend: Trend,
    #[case] new_failures: i64,
) {
    let report = analyzer::compare_results(&before, &after);
    assert_eq!(report.trend, trend);
    assert_eq!(report.new_failures, new_failures);
}

#[test]
fn fixed_tests_counts_tests_that_recovered() {
    let before = run(&[
        ("a", TestStatus::Failed),
        ("b", TestStatus::Error),
        ("c", TestStatus::Failed),
        ("d", TestStatus::Passed),
    ]);
    let after = run(&[
        ("a", TestStatus::Passed),
        ("b", TestStatus::Passed),
        ("c", TestStatus::Failed),
        ("d", TestStatus::Failed),
    ]);

    let report = analyzer::compare_results(&before, &after);

    assert_eq!(report.fixed_tests, 2);
    assert_eq!(report.newly_failing, vec!["d".to_string()]);
    assert_eq!(report.new_failures, 0);
    assert_eq!(report.trend, Trend::Improvement);
    assert_eq!(report.pass_rate_change, 25.0);
}

#[test]
fn projections() {
    let result = run(&[
        ("a", TestStatus::Passed),
        ("b", TestStatus::Error),
        ("c", TestStatus::Failed),
        ("d", TestStatus::Skipped),
    ]);

    let failing: Vec<&str> = analyzer::get_failing_tests(&result)
        .into_iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(failing, vec!["b", "c"]);

    let by_status = analyzer::get_test_distribution_by_status(&result);
    assert_eq!(by_status[&TestStatus::Skipped], 1);
    assert_eq!(by_status.values().sum::<usize>(), 4);

    let by_file = analyzer::get_test_distribution_by_file(&result);
    assert_eq!(by_file[analyzer::UNKNOWN_FILE], 4);
}

#[test]
fn reports_serialize_with_uppercase_labels() {
    let health = serde_json::to_value(validate_test_health(&run_of(1, 0, 0, 0))).unwrap();
    assert_eq!(health["status"], "HEALTHY");
    assert_eq!(health["health_grade"], "A");

    let trend = serde_json::to_value(analyzer::compare_results(
        &run_of(1, 0, 0, 0),
        &run_of(0, 1, 0, 0),
    ))
    .unwrap();
    assert_eq!(trend["trend"], "REGRESSION");
}
