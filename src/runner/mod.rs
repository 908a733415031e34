pub mod cargo;
pub mod coverage;
pub mod detect;
pub mod jest;
pub mod mocha;
pub mod parser;
pub mod process;
pub mod pytest;
pub mod vitest;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;

use crate::error::{Error, Result};
use crate::models::{FrameworkInfo, TestFramework, UnifiedTestResults};

pub use detect::{ConfigFileDetector, FrameworkDetector};
pub use parser::{ParseError, ParsedReport, PipelineFailure, RawOutput, ReportParser};
use process::ProcessOutcome;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Parameters for one test invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_path: PathBuf,
    /// Auto-detected when unset.
    pub framework: Option<TestFramework>,
    pub config_file: Option<PathBuf>,
    pub test_file: Option<String>,
    pub test_pattern: Option<String>,
    pub timeout: Duration,
    pub max_workers: usize,
    pub verbose: bool,
}

impl RunRequest {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            framework: None,
            config_file: None,
            test_file: None,
            test_pattern: None,
            timeout: DEFAULT_TIMEOUT,
            max_workers: DEFAULT_MAX_WORKERS,
            verbose: false,
        }
    }

    pub fn framework(mut self, framework: TestFramework) -> Self {
        self.framework = Some(framework);
        self
    }

    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn test_file(mut self, file: impl Into<String>) -> Self {
        self.test_file = Some(file.into());
        self
    }

    pub fn test_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.test_pattern = Some(pattern.into());
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(Error::InvalidParameter(
                "max_workers must be at least 1".into(),
            ));
        }
        if !self.project_path.is_dir() {
            return Err(Error::InvalidParameter(format!(
                "project path {} is not a directory",
                self.project_path.display()
            )));
        }
        Ok(())
    }

    fn project_name(&self) -> String {
        self.project_path
            .canonicalize()
            .unwrap_or_else(|_| self.project_path.clone())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.project_path.to_string_lossy().to_string())
    }
}

/// A concrete command line for one framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Build from a base command such as `["npx", "jest"]`.
    pub fn from_base(base: &[String]) -> Self {
        let (program, rest) = match base.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args: rest,
            env: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command_line(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

/// Split a configured command string (e.g. `"python -m pytest"`) into words.
pub fn split_command(command: &str) -> Vec<String> {
    shell_words::split(command)
        .unwrap_or_else(|_| command.split_whitespace().map(str::to_string).collect())
}

/// Framework-specific half of a run: how to invoke the tool and how to read
/// what it produced. Spawning, waiting and killing are handled by [`Runner`].
pub trait FrameworkAdapter: Send + Sync {
    fn framework(&self) -> TestFramework;

    /// Extension of the report file the tool is asked to write, or `None`
    /// when it has no file-based report.
    fn report_extension(&self) -> Option<&'static str> {
        Some("json")
    }

    fn build_command(&self, request: &RunRequest, report_path: Option<&Path>) -> Invocation;

    fn structured_parser(&self) -> &dyn ReportParser;

    fn text_parser(&self) -> &dyn ReportParser;

    /// Whether the tool rejected the report flags themselves, e.g. because a
    /// reporter plugin is not installed. The runner then retries once with
    /// `report_path = None` and relies on the text stage.
    fn report_unsupported(&self, _raw: &RawOutput) -> bool {
        false
    }

    /// Structured report first, then text heuristics.
    fn parse_output(&self, raw: &RawOutput) -> std::result::Result<ParsedReport, PipelineFailure> {
        parser::run_pipeline(&[self.structured_parser(), self.text_parser()], raw)
    }
}

/// Failures local to one invocation. Always folded into the result's `error`.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("Test runner binary '{program}' was not found on PATH")]
    ToolNotAvailable { program: String },
    #[error("Test execution timeout after {seconds}s ({})", kill_note(.kill_confirmed))]
    ExecutionTimeout { seconds: f64, kill_confirmed: bool },
    #[error("Could not parse test output (exit code {}): {failure}{}", exit_code_label(.exit_code), stderr_context(.stderr))]
    MalformedReport {
        failure: PipelineFailure,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("Failed to execute test command: {0:#}")]
    Spawn(anyhow::Error),
}

fn kill_note(confirmed: &bool) -> &'static str {
    if *confirmed {
        "process killed"
    } else {
        "process killed, exit not confirmed"
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

fn stderr_context(stderr: &str) -> String {
    let tail = parser::tail(stderr.trim(), 5);
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{}", tail)
    }
}

/// Executes test invocations through registered framework adapters.
///
/// Holds no per-run state, so one `Runner` can serve any number of
/// concurrent invocations.
#[derive(Clone)]
pub struct Runner {
    adapters: HashMap<TestFramework, Arc<dyn FrameworkAdapter>>,
    detector: Arc<dyn FrameworkDetector>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// A runner with the built-in adapters and marker-file detection.
    pub fn new() -> Self {
        let mut runner = Self {
            adapters: HashMap::new(),
            detector: Arc::new(ConfigFileDetector),
        };
        runner
            .register(Arc::new(pytest::PytestAdapter::new()))
            .register(Arc::new(jest::JestAdapter::new()))
            .register(Arc::new(vitest::VitestAdapter::new()))
            .register(Arc::new(cargo::CargoAdapter::new()))
            .register(Arc::new(mocha::MochaAdapter::new()));
        runner
    }

    /// Add or replace the adapter for its framework.
    pub fn register(&mut self, adapter: Arc<dyn FrameworkAdapter>) -> &mut Self {
        self.adapters.insert(adapter.framework(), adapter);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn FrameworkDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn adapter(&self, framework: TestFramework) -> Option<&Arc<dyn FrameworkAdapter>> {
        self.adapters.get(&framework)
    }

    /// Run one test invocation.
    ///
    /// Only invalid parameters produce `Err`; a missing binary, a timeout or an
    /// unreadable report all come back as a result with `error` set.
    pub async fn run_tests(&self, request: RunRequest) -> Result<UnifiedTestResults> {
        request.validate()?;
        let project = request.project_name();

        let info = match request.framework {
            Some(framework) => {
                FrameworkInfo::new(framework).with_config_file(request.config_file.clone())
            }
            None => match self.detector.detect(&request.project_path).await.into_iter().next() {
                Some(info) => info,
                None => {
                    return Ok(UnifiedTestResults::failed_run(
                        project,
                        FrameworkInfo::new(TestFramework::Unknown),
                        format!(
                            "No supported test framework detected in {}",
                            request.project_path.display()
                        ),
                    ));
                }
            },
        };

        let Some(adapter) = self.adapters.get(&info.framework) else {
            return Ok(UnifiedTestResults::failed_run(
                project,
                info.clone(),
                format!("No runner available for framework '{}'", info.framework),
            ));
        };

        let mut request = request;
        if request.config_file.is_none() {
            request.config_file = info.config_file.clone();
        }

        Ok(execute(adapter.as_ref(), &request, project, info).await)
    }

    /// Run several invocations concurrently. Each entry is independent; one
    /// failing never affects the others.
    pub async fn run_many(&self, requests: Vec<RunRequest>) -> Vec<Result<UnifiedTestResults>> {
        futures_util::future::join_all(requests.into_iter().map(|r| self.run_tests(r))).await
    }
}

async fn execute(
    adapter: &dyn FrameworkAdapter,
    request: &RunRequest,
    project: String,
    info: FrameworkInfo,
) -> UnifiedTestResults {
    let report_path = match adapter.report_extension() {
        Some(ext) => match allocate_report_path(adapter.framework(), ext) {
            Ok(path) => Some(path),
            Err(e) => {
                return UnifiedTestResults::failed_run(
                    project,
                    info,
                    RunFailure::Spawn(e).to_string(),
                );
            }
        },
        None => None,
    };

    let invocation = adapter.build_command(request, report_path.as_deref());
    let mut command_line = invocation.command_line();

    let run_started = SystemTime::now();
    let clock = Instant::now();
    let mut attempt = run_attempt(&invocation, request, report_path).await;
    if let Attempt::Finished(raw) = &attempt
        && adapter.report_unsupported(raw)
    {
        tracing::warn!(
            framework = %adapter.framework(),
            "report flags were rejected, retrying with text output only"
        );
        let retry = adapter.build_command(request, None);
        command_line = retry.command_line();
        attempt = run_attempt(&retry, request, None).await;
    }
    let elapsed = clock.elapsed().as_secs_f64();

    let mut environment = environment(&command_line);
    let mut results = match attempt {
        Attempt::Failed(failure) => {
            UnifiedTestResults::failed_run(project, info, failure.to_string())
        }
        Attempt::TimedOut { kill_confirmed } => {
            let failure = RunFailure::ExecutionTimeout {
                seconds: request.timeout.as_secs_f64(),
                kill_confirmed,
            };
            let mut results = UnifiedTestResults::failed_run(project, info, failure.to_string());
            results.summary.timeout = 1;
            results.summary.duration = elapsed;
            results
        }
        Attempt::Finished(raw) => {
            if let Some(code) = raw.exit_code {
                environment.insert("exit_code".into(), code.to_string());
            }
            finish(adapter, raw, project, info, elapsed, run_started)
        }
    };
    results.environment = Some(environment);
    results
}

/// Outcome of spawning one invocation and collecting what it left behind.
enum Attempt {
    Failed(RunFailure),
    TimedOut { kill_confirmed: bool },
    Finished(RawOutput),
}

async fn run_attempt(
    invocation: &Invocation,
    request: &RunRequest,
    report_path: Option<tempfile::TempPath>,
) -> Attempt {
    tracing::debug!(
        command = %invocation.command_line(),
        cwd = %request.project_path.display(),
        "running tests"
    );
    match process::run(invocation, &request.project_path, request.timeout).await {
        Err(failure) => Attempt::Failed(failure),
        // Dropping `report_path` removes the artifact.
        Ok(ProcessOutcome::TimedOut { kill_confirmed, .. }) => Attempt::TimedOut { kill_confirmed },
        Ok(ProcessOutcome::Exited(output)) => {
            let report = match report_path {
                Some(path) => read_report(path).await,
                None => None,
            };
            Attempt::Finished(RawOutput {
                project_root: request.project_path.clone(),
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                report,
            })
        }
    }
}

fn finish(
    adapter: &dyn FrameworkAdapter,
    raw: RawOutput,
    project: String,
    info: FrameworkInfo,
    elapsed: f64,
    run_started: SystemTime,
) -> UnifiedTestResults {
    match adapter.parse_output(&raw) {
        Ok(parsed) => {
            let mut results = parsed.into_results(project, info);
            if results.summary.duration <= 0.0 {
                results.summary.duration = elapsed;
            }
            results.coverage = coverage::discover(&raw.project_root, run_started);
            results
        }
        Err(failure) => {
            let failure = RunFailure::MalformedReport {
                failure,
                exit_code: raw.exit_code,
                stderr: parser::strip_ansi(&raw.stderr),
            };
            let mut results = UnifiedTestResults::failed_run(project, info, failure.to_string());
            results.summary.duration = elapsed;
            results
        }
    }
}

/// Reserve a unique path for the tool's report. The file is removed when the
/// returned handle is closed or dropped.
fn allocate_report_path(
    framework: TestFramework,
    ext: &str,
) -> anyhow::Result<tempfile::TempPath> {
    use anyhow::Context;
    let file = tempfile::Builder::new()
        .prefix(&format!("testlens-{}-", framework))
        .suffix(&format!(".{}", ext))
        .tempfile()
        .context("failed to create temp report file")?;
    Ok(file.into_temp_path())
}

/// Read the report, then delete it.
async fn read_report(path: tempfile::TempPath) -> Option<String> {
    let content = tokio::fs::read_to_string(&path).await.ok();
    if let Err(e) = path.close() {
        tracing::warn!(error = %e, "failed to remove report artifact");
    }
    content.filter(|s| !s.trim().is_empty())
}

fn environment(command_line: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("os".into(), std::env::consts::OS.to_string());
    env.insert("arch".into(), std::env::consts::ARCH.to_string());
    env.insert("command".into(), command_line.to_string());
    env
}
