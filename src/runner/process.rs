use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::{Invocation, RunFailure};

/// How long a killed process gets to actually exit before we give up on it.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for the output pipes to close after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    TimedOut {
        output: ProcessOutput,
        /// Whether the child was observed to exit after the kill.
        kill_confirmed: bool,
    },
}

/// Guard that kills the child process (and its entire process group) on drop.
struct ChildGuard {
    child: tokio::process::Child,
    /// Process group ID saved at spawn time so we can kill the whole group.
    #[cfg(unix)]
    pgid: Option<u32>,
}

impl ChildGuard {
    fn new(child: tokio::process::Child) -> Self {
        #[cfg(unix)]
        let pgid = child.id();
        Self {
            child,
            #[cfg(unix)]
            pgid,
        }
    }

    fn kill(&mut self) {
        // Kill the entire process group so forked test workers don't become orphans.
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
        }
        // Fallback / non-Unix: kill just the direct child.
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "start_kill on test process failed");
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Background reader for one output pipe. Bytes land in a shared buffer as
/// they arrive, so whatever was read is still available if the pipe never
/// closes.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drain {
    fn spawn<R: AsyncRead + Unpin + Send + 'static>(reader: Option<R>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let handle = tokio::spawn(async move {
            let Some(mut reader) = reader else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buffer, handle }
    }

    /// Waits up to [`DRAIN_GRACE`] for end of stream, then returns what was read.
    async fn collect(self) -> String {
        let abort = self.handle.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, self.handle).await.is_err() {
            tracing::debug!("output pipe still open after exit, keeping partial output");
            abort.abort();
        }
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Spawn `invocation` in `cwd` and wait for it under `timeout`.
///
/// The child runs in its own process group with both output streams drained
/// concurrently. On timeout the group is killed and the child gets
/// [`KILL_GRACE`] to exit; the call returns either way.
pub async fn run(
    invocation: &Invocation,
    cwd: &Path,
    timeout: Duration,
) -> Result<ProcessOutcome, RunFailure> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args);
    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }

    // Put the child in its own process group so killing it (via ChildGuard) also
    // takes out any worker processes the test tool forks.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.as_std_mut().process_group(0);
    }

    let mut child = match cmd
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunFailure::ToolNotAvailable {
                program: invocation.program.clone(),
            });
        }
        Err(e) => {
            return Err(RunFailure::Spawn(
                anyhow::Error::new(e).context(format!("failed to spawn {}", invocation.program)),
            ));
        }
    };

    let stdout = Drain::spawn(child.stdout.take());
    let stderr = Drain::spawn(child.stderr.take());

    // The child stays in the guard so it is killed if this future is dropped.
    let mut guard = ChildGuard::new(child);

    match tokio::time::timeout(timeout, guard.child.wait()).await {
        Ok(status) => {
            let status = status
                .with_context(|| format!("failed to wait for {}", invocation.program))
                .map_err(RunFailure::Spawn)?;
            // Background jobs left in the group would hold the pipes open.
            guard.kill();
            Ok(ProcessOutcome::Exited(ProcessOutput {
                stdout: stdout.collect().await,
                stderr: stderr.collect().await,
                exit_code: status.code(),
            }))
        }
        Err(_) => {
            tracing::warn!(
                program = %invocation.program,
                timeout_secs = timeout.as_secs_f64(),
                "test process exceeded its time budget, killing"
            );
            guard.kill();
            let kill_confirmed = matches!(
                tokio::time::timeout(KILL_GRACE, guard.child.wait()).await,
                Ok(Ok(_))
            );
            if !kill_confirmed {
                tracing::warn!(program = %invocation.program, "could not confirm test process exit");
            }
            Ok(ProcessOutcome::TimedOut {
                output: ProcessOutput {
                    stdout: stdout.collect().await,
                    stderr: stderr.collect().await,
                    exit_code: None,
                },
                kill_confirmed,
            })
        }
    }
}
