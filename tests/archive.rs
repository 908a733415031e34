use std::collections::HashSet;
use std::fs::{File, FileTimes};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use testlens::{Archive, FrameworkInfo, TestFramework, TestResult, TestStatus, UnifiedTestResults};

fn result(project: &str, framework: TestFramework) -> UnifiedTestResults {
    UnifiedTestResults::from_tests(
        project,
        FrameworkInfo::new(framework),
        vec![
            TestResult::new("a", TestStatus::Passed).with_duration(0.1),
            TestResult::new("b", TestStatus::Failed).with_duration(0.2),
        ],
    )
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[test]
fn archived_result_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path().join("archive"));
    let original = result("api", TestFramework::Pytest);

    let path = archive
        .archive_results(&original, Some(at(0)), Some("nightly"))
        .unwrap();

    assert_eq!(
        path.file_name().unwrap().to_string_lossy(),
        "nightly_20231114T221320.000000Z.json"
    );
    let latest = archive.get_latest_result().unwrap().unwrap();
    assert_eq!(latest.results, original);
    assert_eq!(latest.run_name.as_deref(), Some("nightly"));
    assert_eq!(latest.archived_at, at(0));
    assert_eq!(latest.path, path);
}

#[test]
fn empty_or_missing_archive_has_no_history() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path().join("never-created"));
    assert!(archive.get_latest_result().unwrap().is_none());
    assert!(archive.get_result_history(10).unwrap().is_empty());
    assert_eq!(archive.cleanup_old_archives(0).unwrap(), 0);
}

#[test]
fn history_is_newest_first_and_filterable() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    archive
        .archive_results(&result("one", TestFramework::Jest), Some(at(10)), None)
        .unwrap();
    archive
        .archive_results(&result("two", TestFramework::Pytest), Some(at(30)), None)
        .unwrap();
    archive
        .archive_results(&result("three", TestFramework::Jest), Some(at(20)), None)
        .unwrap();

    let history = archive.get_result_history(2).unwrap();
    let projects: Vec<&str> = history.iter().map(|e| e.results.project.as_str()).collect();
    assert_eq!(projects, vec!["two", "three"]);

    let jest = archive.get_archived_results(Some(TestFramework::Jest)).unwrap();
    let projects: Vec<&str> = jest.iter().map(|e| e.results.project.as_str()).collect();
    assert_eq!(projects, vec!["three", "one"]);
}

#[test]
fn malformed_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    archive
        .archive_results(&result("ok", TestFramework::Cargo), None, None)
        .unwrap();
    std::fs::write(dir.path().join("garbage_20200101T000000.000000Z.json"), "{ not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let entries = archive.get_archived_results(None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].results.project, "ok");
}

#[test]
fn same_timestamp_gets_a_unique_name() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    let first = archive
        .archive_results(&result("a", TestFramework::Jest), Some(at(0)), None)
        .unwrap();
    let second = archive
        .archive_results(&result("b", TestFramework::Jest), Some(at(0)), None)
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(archive.get_archived_results(None).unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    let stamp = at(0);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || {
                archive.archive_results(
                    &result(&format!("p{}", i), TestFramework::Vitest),
                    Some(stamp),
                    Some("ci"),
                )
            })
        })
        .collect();

    let mut paths = HashSet::new();
    for handle in handles {
        paths.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(paths.len(), 16);

    let projects: HashSet<String> = archive
        .get_archived_results(None)
        .unwrap()
        .into_iter()
        .map(|e| e.results.project)
        .collect();
    assert_eq!(projects.len(), 16);
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn cleanup_removes_only_old_files() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    let old = archive
        .archive_results(&result("old", TestFramework::Jest), Some(at(0)), None)
        .unwrap();
    let fresh = archive
        .archive_results(&result("fresh", TestFramework::Jest), Some(at(1)), None)
        .unwrap();

    let month_ago = SystemTime::now() - Duration::from_secs(31 * 24 * 60 * 60);
    File::options()
        .write(true)
        .open(&old)
        .unwrap()
        .set_times(FileTimes::new().set_modified(month_ago))
        .unwrap();

    assert_eq!(archive.cleanup_old_archives(30).unwrap(), 1);
    assert!(!old.exists());
    assert!(fresh.exists());
}

#[test]
fn cleanup_leaves_unrelated_json_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path());
    let old = archive
        .archive_results(&result("old", TestFramework::Jest), Some(at(0)), None)
        .unwrap();
    let notes = dir.path().join("notes.json");
    std::fs::write(&notes, "{\"keep\": true}").unwrap();

    let month_ago = SystemTime::now() - Duration::from_secs(31 * 24 * 60 * 60);
    for path in [&old, &notes] {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_times(FileTimes::new().set_modified(month_ago))
            .unwrap();
    }

    assert_eq!(archive.get_archived_results(None).unwrap().len(), 1);
    assert_eq!(archive.cleanup_old_archives(0).unwrap(), 1);
    assert!(!old.exists());
    assert!(notes.exists());
}
