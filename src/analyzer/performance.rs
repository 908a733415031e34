use serde::{Deserialize, Serialize};

use crate::models::{TestStatus, UnifiedTestResults};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTiming {
    pub name: String,
    pub duration_seconds: f64,
    pub status: TestStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Tests with a recorded duration; the statistics cover only these.
    pub timed_tests: usize,
    pub total_duration_seconds: f64,
    pub average_duration_seconds: f64,
    pub median_duration_seconds: f64,
    pub p95_duration_seconds: f64,
    pub p99_duration_seconds: f64,
    pub slowest_tests: Vec<TestTiming>,
    pub fastest_tests: Vec<TestTiming>,
}

/// Duration statistics over the timed tests of one run.
///
/// Tests without a duration are left out. An empty run gives the all-zero report.
pub fn analyze_performance(result: &UnifiedTestResults, top_n: usize) -> PerformanceReport {
    let mut timings: Vec<TestTiming> = result
        .tests
        .iter()
        .filter(|t| t.is_timed() && t.duration.is_finite())
        .map(|t| TestTiming {
            name: t.name.clone(),
            duration_seconds: t.duration,
            status: t.status,
        })
        .collect();
    if timings.is_empty() {
        return PerformanceReport::default();
    }

    // Stable sort keeps run order among equal durations.
    timings.sort_by(|a, b| a.duration_seconds.total_cmp(&b.duration_seconds));
    let sorted: Vec<f64> = timings.iter().map(|t| t.duration_seconds).collect();
    let total: f64 = sorted.iter().sum();

    let fastest_tests = timings.iter().take(top_n).cloned().collect();
    let slowest_tests = timings.iter().rev().take(top_n).cloned().collect();

    PerformanceReport {
        timed_tests: sorted.len(),
        total_duration_seconds: total,
        average_duration_seconds: total / sorted.len() as f64,
        median_duration_seconds: median(&sorted),
        p95_duration_seconds: percentile(&sorted, 95.0),
        p99_duration_seconds: percentile(&sorted, 99.0),
        slowest_tests,
        fastest_tests,
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Nearest-rank percentile of a non-empty ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
