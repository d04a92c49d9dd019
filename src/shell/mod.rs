//! Shell — runs external tools (kubectl, helm, minikube, docker, provisioning scripts)
//!
//! Two modes:
//! - buffered: wait for exit, hand back stdout/stderr
//! - streamed: forward every output chunk to a callback as it arrives
//!
//! Spawn failures never surface as errors here. They land in `exit_error`
//! (buffered) or as a stderr chunk plus a `None` exit code (streamed) and the
//! caller decides whether they matter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use sysinfo::{Pid, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
pub mod fake;

/// Result of a buffered command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    /// Set when the command could not be started at all
    pub exit_error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn ok(stdout: &str) -> Self {
        Self { exit_error: None, stdout: stdout.to_string(), stderr: String::new() }
    }

    pub fn err(stderr: &str) -> Self {
        Self { exit_error: None, stdout: String::new(), stderr: stderr.to_string() }
    }
}

/// Which pipe a streamed chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One chunk of streamed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// A row from the OS process table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command: String,
}

/// Callback receiving streamed output. Stdout and stderr are pumped
/// concurrently, so it may be called from either pump.
pub type ChunkHandler<'a> = &'a (dyn Fn(OutputChunk) + Send + Sync);

#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// Run through the platform shell and buffer everything.
    async fn run(&self, command: &str) -> ShellOutput;

    /// Run through the platform shell, forwarding chunks in arrival order per
    /// stream. `env` is added to the child's environment and never appears on
    /// its command line. Resolves with the exit code, or `None` when the
    /// process could not report one (spawn failure, signal, cancellation).
    /// Cancelling kills the command and everything it started.
    async fn run_streamed(
        &self,
        command: &str,
        env: &[(&str, &str)],
        on_chunk: ChunkHandler<'_>,
        cancel: &CancellationToken,
    ) -> Option<i32>;

    /// Running processes whose name or command line contains `filter`.
    fn list_processes(&self, filter: &str) -> Vec<ProcessInfo>;

    /// Terminate a process by pid. Returns false if it was not found.
    fn kill_process(&self, pid: u32) -> bool;
}

/// Quote a value for safe interpolation into a POSIX shell command line
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Make the child lead a new process group so it can be killed with its descendants
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: the group id is the pid of a child we spawned as group leader
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child) {}

/// Kill a child spawned with `own_process_group` and everything under it
async fn kill_group(child: &mut Child) {
    signal_group(child);
    let _ = child.kill().await;
}

/// ShellExecutor backed by real OS processes
pub struct SystemShell;

impl SystemShell {
    pub fn new() -> Self {
        SystemShell
    }
}

#[async_trait]
impl ShellExecutor for SystemShell {
    async fn run(&self, command: &str) -> ShellOutput {
        debug!("exec: {}", command);
        match shell_command(command).stdin(Stdio::null()).output().await {
            Ok(output) => ShellOutput {
                exit_error: None,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command, e);
                ShellOutput {
                    exit_error: Some(e.to_string()),
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
        }
    }

    async fn run_streamed(
        &self,
        command: &str,
        env: &[(&str, &str)],
        on_chunk: ChunkHandler<'_>,
        cancel: &CancellationToken,
    ) -> Option<i32> {
        debug!("exec (streamed): {}", command);
        let mut cmd = shell_command(command);
        cmd.envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command, e);
                on_chunk(OutputChunk { stream: OutputStream::Stderr, text: e.to_string() });
                return None;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pumps = async {
            tokio::join!(
                pump(stdout, OutputStream::Stdout, on_chunk),
                pump(stderr, OutputStream::Stderr, on_chunk),
            )
        };

        tokio::select! {
            _ = pumps => {}
            _ = cancel.cancelled() => {
                warn!("Cancelled: {}", command);
                kill_group(&mut child).await;
                return None;
            }
        }

        tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()),
            _ = cancel.cancelled() => {
                kill_group(&mut child).await;
                None
            }
        }
    }

    fn list_processes(&self, filter: &str) -> Vec<ProcessInfo> {
        let sys = System::new_all();
        let own_pid = std::process::id();
        sys.processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own_pid)
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().to_string();
                let command = process.cmd().iter()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                if name.contains(filter) || command.contains(filter) {
                    Some(ProcessInfo { pid: pid.as_u32(), name, command })
                } else {
                    None
                }
            })
            .collect()
    }

    fn kill_process(&self, pid: u32) -> bool {
        let sys = System::new_all();
        match sys.process(Pid::from_u32(pid)) {
            Some(process) => process.kill(),
            None => false,
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    stream: OutputStream,
    on_chunk: ChunkHandler<'_>,
) {
    let Some(mut reader) = reader else { return };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => on_chunk(OutputChunk {
                stream,
                text: String::from_utf8_lossy(&buf[..n]).to_string(),
            }),
            Err(e) => {
                debug!("pipe read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("/home/dev/engine"), "/home/dev/engine");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("p@ss$word"), "'p@ss$word'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn buffered_run_captures_both_streams() {
        let out = SystemShell::new().run("echo hello; echo oops 1>&2").await;
        assert_eq!(out.exit_error, None);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streamed_run_reports_exit_code_and_chunks() {
        let seen = Mutex::new(Vec::new());
        let handler = |chunk: OutputChunk| seen.lock().unwrap().push(chunk);
        let code = SystemShell::new()
            .run_streamed("echo first; echo second 1>&2; exit 3", &[], &handler, &CancellationToken::new())
            .await;
        assert_eq!(code, Some(3));

        let seen = seen.into_inner().unwrap();
        let stdout: String = seen.iter()
            .filter(|c| c.stream == OutputStream::Stdout)
            .map(|c| c.text.as_str())
            .collect();
        let stderr: String = seen.iter()
            .filter(|c| c.stream == OutputStream::Stderr)
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(stdout.trim(), "first");
        assert_eq!(stderr.trim(), "second");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_stream_returns_none() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handler = |_chunk: OutputChunk| {};
        let code = SystemShell::new().run_streamed("sleep 30", &[], &handler, &cancel).await;
        assert_eq!(code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_reaches_child_but_not_its_command_line() {
        let seen = Mutex::new(String::new());
        let handler = |chunk: OutputChunk| seen.lock().unwrap().push_str(&chunk.text);
        let code = SystemShell::new()
            .run_streamed("echo \"$CC_TEST_SECRET\"", &[("CC_TEST_SECRET", "hunter2")], &handler, &CancellationToken::new())
            .await;
        assert_eq!(code, Some(0));
        assert_eq!(seen.into_inner().unwrap().trim(), "hunter2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_grandchildren() {
        let cancel = CancellationToken::new();
        let seen = Mutex::new(String::new());
        let handler = |chunk: OutputChunk| {
            seen.lock().unwrap().push_str(&chunk.text);
            cancel.cancel();
        };
        let code = SystemShell::new()
            .run_streamed("sleep 30 & echo $!; wait", &[], &handler, &cancel)
            .await;
        assert_eq!(code, None);

        let pid: u32 = seen.into_inner().unwrap().trim().parse().unwrap();
        let mut alive = true;
        for _ in 0..100 {
            let sys = System::new_all();
            alive = sys.process(Pid::from_u32(pid))
                .is_some_and(|p| p.status() != sysinfo::ProcessStatus::Zombie);
            if !alive {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!alive, "background sleep {} survived cancellation", pid);
    }
}
