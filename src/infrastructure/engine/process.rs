//! Builder for running an external tool with a deadline and cancellation.
//!
//! The child is always reaped before [`ToolCommand::execute`] returns: on
//! timeout or cancellation it receives SIGTERM (unix), gets `grace` to exit,
//! and is then killed.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error waiting for process: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// Output captured from a finished tool run. A nonzero exit is not an error
/// here; callers inspect `status`.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    grace: Duration,
}

enum Exit {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Time between SIGTERM and SIGKILL.
    pub fn grace(&mut self, d: Duration) -> &mut Self {
        self.grace = d;
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.program_name(),
            source,
        })?;
        debug!(program = %self.program_name(), pid = ?child.id(), "spawned");

        // Drain both pipes concurrently so a chatty child never blocks on a full pipe.
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status),
            _ = tokio::time::sleep(self.timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        match exit {
            Exit::Finished(status) => {
                let status = status?;
                // A grandchild holding the pipes open must not outlive the deadline.
                let stdout = drain(stdout_task, self.grace).await;
                let stderr = drain(stderr_task, self.grace).await;
                Ok(ToolOutput {
                    status,
                    stdout: String::from_utf8_lossy(&stdout).to_string(),
                    stderr: String::from_utf8_lossy(&stderr).to_string(),
                    elapsed: started.elapsed(),
                })
            }
            Exit::TimedOut => {
                warn!(program = %self.program_name(), timeout = ?self.timeout, "process timed out, terminating");
                terminate(&mut child, self.grace).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ToolError::TimedOut(self.timeout))
            }
            Exit::Cancelled => {
                debug!(program = %self.program_name(), "process cancelled, terminating");
                terminate(&mut child, self.grace).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ToolError::Cancelled)
            }
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

async fn drain(task: JoinHandle<Vec<u8>>, within: Duration) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(within, task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            warn!(?within, "output pipe still open after exit, dropping it");
            abort.abort();
            Vec::new()
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Returns once the child is reaped.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                    debug!(pid, %status, "process exited after SIGTERM");
                    return;
                }
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!("failed to kill child process: {}", e);
    }
}
