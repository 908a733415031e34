use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::{FrameworkInfo, TestFramework};

/// Decides which frameworks a project uses. Results are in preference order;
/// the runner takes the first one.
#[async_trait]
pub trait FrameworkDetector: Send + Sync {
    async fn detect(&self, project: &Path) -> Vec<FrameworkInfo>;
}

/// Detection from well-known config files and `package.json` dependencies.
///
/// Only looks at the project root; it is a convenience default, not a full
/// project analysis.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigFileDetector;

const VITEST_CONFIGS: &str = "vitest.config.*";
const JEST_CONFIGS: &str = "jest.config.*";
const MOCHA_CONFIGS: &str = ".mocharc*";
const PYTEST_CONFIGS: [&str; 3] = ["pytest.ini", "conftest.py", "tox.ini"];

#[async_trait]
impl FrameworkDetector for ConfigFileDetector {
    async fn detect(&self, project: &Path) -> Vec<FrameworkInfo> {
        let project = project.to_path_buf();
        tokio::task::spawn_blocking(move || detect_sync(&project))
            .await
            .unwrap_or_default()
    }
}

fn detect_sync(project: &Path) -> Vec<FrameworkInfo> {
    let mut found: Vec<FrameworkInfo> = Vec::new();
    let mut push = |framework: TestFramework, config: Option<PathBuf>| {
        if !found.iter().any(|f| f.framework == framework) {
            found.push(FrameworkInfo::new(framework).with_config_file(config));
        }
    };

    let dependencies = package_dependencies(project);
    let has_dep = |name: &str| dependencies.iter().any(|d| d == name);

    if let Some(config) = find_config(project, VITEST_CONFIGS) {
        push(TestFramework::Vitest, Some(config));
    } else if has_dep("vitest") {
        push(TestFramework::Vitest, None);
    }
    if let Some(config) = find_config(project, JEST_CONFIGS) {
        push(TestFramework::Jest, Some(config));
    } else if has_dep("jest") {
        push(TestFramework::Jest, None);
    }
    if let Some(config) = find_config(project, MOCHA_CONFIGS) {
        push(TestFramework::Mocha, Some(config));
    } else if has_dep("mocha") {
        push(TestFramework::Mocha, None);
    }

    if let Some(config) = PYTEST_CONFIGS
        .iter()
        .map(|name| project.join(name))
        .find(|path| path.is_file())
    {
        // conftest.py is a marker, not a config file.
        let is_config = config.file_name().is_some_and(|n| n != "conftest.py");
        push(TestFramework::Pytest, is_config.then_some(config));
    } else if file_contains(&project.join("pyproject.toml"), "[tool.pytest")
        || file_contains(&project.join("setup.cfg"), "[tool:pytest]")
    {
        push(TestFramework::Pytest, None);
    }

    if project.join("Cargo.toml").is_file() {
        push(TestFramework::Cargo, None);
    }

    found
}

/// Find a config file matching `pattern` in the project root.
fn find_config(project: &Path, pattern: &str) -> Option<PathBuf> {
    let pattern = project.join(pattern).to_string_lossy().to_string();
    glob::glob(&pattern)
        .ok()?
        .flatten()
        .find(|entry| entry.is_file())
}

fn package_dependencies(project: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(project.join("package.json")) else {
        return Vec::new();
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return Vec::new();
    };
    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| json[*key].as_object())
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn file_contains(path: &Path, needle: &str) -> bool {
    std::fs::read_to_string(path).is_ok_and(|c| c.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefers_config_files_and_keeps_their_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vitest.config.ts"), "export default {}").unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"devDependencies": {"vitest": "^1.0.0", "mocha": "^10.0.0"}}"#,
        )
        .unwrap();

        let found = ConfigFileDetector.detect(dir.path()).await;
        let frameworks: Vec<TestFramework> = found.iter().map(|f| f.framework).collect();
        assert_eq!(frameworks, vec![TestFramework::Vitest, TestFramework::Mocha]);
        assert_eq!(
            found[0].config_file.as_deref(),
            Some(dir.path().join("vitest.config.ts").as_path())
        );
        assert_eq!(found[1].config_file, None);
    }

    #[tokio::test]
    async fn detects_python_and_rust_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conftest.py"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();

        let found = ConfigFileDetector.detect(dir.path()).await;
        let frameworks: Vec<TestFramework> = found.iter().map(|f| f.framework).collect();
        assert_eq!(frameworks, vec![TestFramework::Pytest, TestFramework::Cargo]);
        assert_eq!(found[0].config_file, None);
    }

    #[tokio::test]
    async fn empty_project_detects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigFileDetector.detect(dir.path()).await.is_empty());
    }
}
