//! Execution of configured scripts as child processes.
//!
//! [`run_script`] spawns the program described by a [`ScriptInvocation`],
//! captures its stdout and enforces (or merely observes) the timeout. A
//! failed run is reported inside the returned [`ScriptResult`] rather than
//! as an `Err`, because callers always render a response regardless.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Everything needed to start one script run.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub name: String,
    pub program: String,
    /// Static arguments followed by the per-request ones.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Kill the process once `timeout` has elapsed.
    pub enforced: bool,
}

/// Reasons a script run counts as failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("program not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("killed after exceeding timeout of {:.3}s", timeout.as_secs_f64())]
    Timeout { timeout: Duration },
    #[error("exited with code {0}")]
    ExitStatus(i32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a script run.
#[derive(Debug)]
pub struct ScriptResult {
    pub stdout: String,
    /// Process exit code (`-1` if it never started, was killed or died by signal).
    pub exit_code: i32,
    pub elapsed: Duration,
    /// The timeout elapsed before the process exited.
    pub timed_out: bool,
    pub error: Option<RunError>,
}

impl ScriptResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: RunError, elapsed: Duration, timed_out: bool) -> Self {
        Self {
            stdout: String::new(),
            exit_code: -1,
            elapsed,
            timed_out,
            error: Some(error),
        }
    }
}

/// Runs the script and waits for it according to its timeout policy.
pub async fn run_script(invocation: &ScriptInvocation) -> ScriptResult {
    let start = Instant::now();

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a timeout can take down the script's children too.
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(
        script = %invocation.name,
        program = %invocation.program,
        args = ?invocation.args,
        "Starting script"
    );

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ScriptResult::failed(spawn_error(&invocation.program, e), start.elapsed(), false)
        }
    };

    // Captured before the wait reaps the child, so the group can still be killed.
    let pid = child.id();

    // Read pipes in their own tasks so a chatty script cannot block on a full pipe.
    let mut stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let mut stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    // The deadline covers draining both pipes: a background child may keep
    // them open long after the script itself exited.
    let mut timed_out = false;
    let finished = {
        let run = wait_and_drain(&mut child, &mut stdout_task, &mut stderr_task);
        tokio::pin!(run);
        match invocation.timeout {
            None => Some(run.await),
            Some(limit) => match tokio::time::timeout(limit, &mut run).await {
                Ok(done) => Some(done),
                Err(_elapsed) if invocation.enforced => None,
                Err(_elapsed) => {
                    timed_out = true;
                    warn!(
                        script = %invocation.name,
                        "Script exceeded timeout of {:.3}s, waiting for it to finish",
                        limit.as_secs_f64()
                    );
                    Some(run.await)
                }
            },
        }
    };

    let Some((status, stdout_bytes, stderr_bytes)) = finished else {
        kill_process_tree(&mut child, pid, &invocation.name).await;
        stdout_task.abort();
        stderr_task.abort();
        let timeout = invocation.timeout.unwrap_or_default();
        return ScriptResult::failed(RunError::Timeout { timeout }, start.elapsed(), true);
    };
    let elapsed = start.elapsed();

    let status = match status {
        Ok(status) => status,
        Err(e) => return ScriptResult::failed(RunError::Io(e), elapsed, timed_out),
    };

    let stderr = String::from_utf8_lossy(&stderr_bytes);
    if !stderr.trim().is_empty() {
        debug!(script = %invocation.name, stderr = %stderr.trim(), "Script wrote to stderr");
    }

    let exit_code = status.code().unwrap_or(-1);
    ScriptResult {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        exit_code,
        elapsed,
        timed_out,
        error: (!status.success()).then_some(RunError::ExitStatus(exit_code)),
    }
}

/// Waits for the process to exit and for both output streams to close.
async fn wait_and_drain(
    child: &mut Child,
    stdout: &mut JoinHandle<Vec<u8>>,
    stderr: &mut JoinHandle<Vec<u8>>,
) -> (std::io::Result<ExitStatus>, Vec<u8>, Vec<u8>) {
    let status = child.wait().await;
    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();
    (status, stdout, stderr)
}

/// Kills the script together with everything it started.
async fn kill_process_tree(child: &mut Child, pid: Option<u32>, name: &str) {
    if let Some(pid) = pid {
        if let Err(e) = kill_process_group(pid) {
            debug!(script = %name, "Failed to kill process group {}: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!(script = %name, "Failed to kill timed out script: {}", e);
    }
}

/// Sends SIGKILL to the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::from(ErrorKind::InvalidInput))?;
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the group created for the script at spawn time.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(cmd: &str) -> ScriptInvocation {
        ScriptInvocation {
            name: "test".into(),
            program: "/bin/sh".into(),
            args: vec!["-c".into(), cmd.into()],
            env: BTreeMap::new(),
            timeout: None,
            enforced: false,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let result = run_script(&shell("echo 'foo 1'; echo bar 2")).await;
        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "foo 1\nbar 2\n");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_passes_arguments_and_env() {
        let mut inv = shell("echo \"$1 $GREETING\"");
        inv.args.push("argv0".into());
        inv.args.push("hello".into());
        inv.env.insert("GREETING".into(), "world".into());

        let result = run_script(&inv).await;
        assert_eq!(result.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let result = run_script(&shell("echo partial 1; exit 3")).await;
        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "partial 1\n");
        assert!(matches!(result.error, Some(RunError::ExitStatus(3))));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let mut inv = shell("");
        inv.program = "/nonexistent/script.sh".into();
        let result = run_script(&inv).await;
        assert_eq!(result.exit_code, -1);
        assert!(matches!(result.error, Some(RunError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_enforced_timeout_kills() {
        let mut inv = shell("sleep 5");
        inv.timeout = Some(Duration::from_millis(200));
        inv.enforced = true;

        let result = run_script(&inv).await;
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(matches!(result.error, Some(RunError::Timeout { .. })));
        assert!(result.elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_enforced_timeout_covers_inherited_stdout() {
        // The shell exits at once, but the background sleep keeps stdout open.
        let mut inv = shell("sleep 4 & echo 'x 1'");
        inv.timeout = Some(Duration::from_millis(300));
        inv.enforced = true;

        let result = run_script(&inv).await;
        assert!(result.timed_out);
        assert!(!result.success());
        assert!(matches!(result.error, Some(RunError::Timeout { .. })));
        assert!(result.elapsed < Duration::from_secs(2), "took {:?}", result.elapsed);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_enforced_timeout_kills_background_children() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let mut inv = shell("sleep 30 & echo $! > \"$PID_FILE\"; wait");
        inv.env
            .insert("PID_FILE".into(), pid_file.display().to_string());
        inv.timeout = Some(Duration::from_millis(300));
        inv.enforced = true;

        let result = run_script(&inv).await;
        assert!(result.timed_out);

        // Dead once gone from /proc or left as a zombie nobody reaped yet.
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let stat = format!("/proc/{}/stat", pid.trim());
        let alive = || {
            std::fs::read_to_string(&stat)
                .ok()
                .and_then(|s| s.rsplit_once(')').map(|(_, rest)| rest.trim_start().to_string()))
                .is_some_and(|rest| !rest.starts_with('Z'))
        };
        let deadline = Instant::now() + Duration::from_secs(3);
        while alive() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive(), "background sleep {} survived", pid.trim());
    }

    #[tokio::test]
    async fn test_soft_timeout_waits_for_completion() {
        let mut inv = shell("sleep 0.3; echo done 1");
        inv.timeout = Some(Duration::from_millis(50));

        let result = run_script(&inv).await;
        assert!(result.timed_out);
        assert!(result.success());
        assert_eq!(result.stdout, "done 1\n");
    }
}
