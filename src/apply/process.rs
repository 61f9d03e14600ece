use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Exit code recorded when a step exceeds its timeout and is killed.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code recorded when a step's tool cannot be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;
/// Maximum captured bytes per stream (8 MB).
const MAX_CAPTURE_BYTES: u64 = 8 * 1024 * 1024;
/// Grace period for draining pipes after a kill; grandchildren may hold them open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A fully specified child-process invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CapturedRun {
    pub exit_code: i32,
    pub timed_out: bool,
    pub error: Option<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        let mut limited = reader.take(MAX_CAPTURE_BYTES);
        if let Err(error) = limited.read_to_end(&mut buf).await {
            tracing::debug!("output drain stopped early: {error}");
        }
    }
    buf
}

async fn collect(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

/// Spawn `spec`, drain standard-out and standard-err concurrently, and wait
/// for exit or the timeout. A timed-out child is killed; nothing is left
/// running when this returns.
pub async fn run_captured(spec: &ProcessSpec) -> CapturedRun {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(error) => {
            return CapturedRun {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                error: Some(format!("failed to start '{}': {error}", spec.program)),
                ..CapturedRun::default()
            };
        }
    };

    let stdout = tokio::spawn(drain(child.stdout.take()));
    let stderr = tokio::spawn(drain(child.stderr.take()));

    let waited = tokio::time::timeout(spec.timeout, child.wait()).await;
    let (exit_code, timed_out, error) = match waited {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false, None),
        Ok(Err(error)) => (-1, false, Some(format!("failed waiting for process: {error}"))),
        Err(_) => {
            if let Err(error) = child.kill().await {
                tracing::warn!(program = %spec.program, "failed to kill timed-out process: {error}");
            }
            (
                TIMEOUT_EXIT_CODE,
                true,
                Some(format!(
                    "timed out after {}s and was killed",
                    spec.timeout.as_secs()
                )),
            )
        }
    };

    let (stdout, stderr) = tokio::join!(collect(stdout), collect(stderr));
    CapturedRun {
        exit_code,
        timed_out,
        error,
        stdout,
        stderr,
    }
}

/// Persist captured streams; a failure here loses logs, not the step result.
pub async fn write_stream(path: &Path, bytes: &[u8]) -> Option<PathBuf> {
    match tokio::fs::write(path, bytes).await {
        Ok(()) => Some(path.to_path_buf()),
        Err(error) => {
            tracing::warn!(path = %path.display(), "failed to write step output: {error}");
            None
        }
    }
}
