//! Scriptable ShellExecutor for tests. Responses are matched by substring,
//! first registered match wins; every invocation is recorded.

use super::{ChunkHandler, OutputChunk, OutputStream, ProcessInfo, ShellExecutor, ShellOutput};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeShell {
    buffered: Mutex<Vec<(String, ShellOutput)>>,
    streamed: Mutex<Vec<(String, Vec<OutputChunk>, Option<i32>)>>,
    held: Mutex<Vec<String>>,
    processes: Mutex<Vec<ProcessInfo>>,
    calls: Mutex<Vec<String>>,
    streamed_calls: Mutex<Vec<String>>,
    streamed_env: Mutex<Vec<Vec<(String, String)>>>,
    listed: Mutex<Vec<String>>,
    killed: Mutex<Vec<u32>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, output: ShellOutput) -> Self {
        self.buffered.lock().unwrap().push((pattern.to_string(), output));
        self
    }

    pub fn on_streamed(self, pattern: &str, stdout: &[&str], code: Option<i32>) -> Self {
        let chunks = stdout.iter()
            .map(|s| OutputChunk { stream: OutputStream::Stdout, text: s.to_string() })
            .collect();
        self.streamed.lock().unwrap().push((pattern.to_string(), chunks, code));
        self
    }

    /// Streamed commands matching `pattern` run until cancelled
    pub fn hold_streamed(self, pattern: &str) -> Self {
        self.held.lock().unwrap().push(pattern.to_string());
        self
    }

    pub fn add_process(&self, pid: u32, command: &str) {
        let name = command.split_whitespace().next().unwrap_or_default().to_string();
        self.processes.lock().unwrap().push(ProcessInfo { pid, name, command: command.to_string() });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn streamed_calls(&self) -> Vec<String> {
        self.streamed_calls.lock().unwrap().clone()
    }

    /// Environment passed with each streamed call
    pub fn streamed_env(&self) -> Vec<Vec<(String, String)>> {
        self.streamed_env.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.listed.lock().unwrap().len()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellExecutor for FakeShell {
    async fn run(&self, command: &str) -> ShellOutput {
        self.calls.lock().unwrap().push(command.to_string());
        self.buffered.lock().unwrap().iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ShellOutput {
                exit_error: Some(format!("no fake response for '{}'", command)),
                ..Default::default()
            })
    }

    async fn run_streamed(
        &self,
        command: &str,
        env: &[(&str, &str)],
        on_chunk: ChunkHandler<'_>,
        cancel: &CancellationToken,
    ) -> Option<i32> {
        self.streamed_calls.lock().unwrap().push(command.to_string());
        self.streamed_env.lock().unwrap()
            .push(env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
        if cancel.is_cancelled() {
            return None;
        }
        let held = self.held.lock().unwrap().iter().any(|p| command.contains(p.as_str()));
        if held {
            cancel.cancelled().await;
            return None;
        }
        let scripted = self.streamed.lock().unwrap().iter()
            .find(|(pattern, _, _)| command.contains(pattern.as_str()))
            .map(|(_, chunks, code)| (chunks.clone(), *code));
        match scripted {
            Some((chunks, code)) => {
                for chunk in chunks {
                    on_chunk(chunk);
                }
                code
            }
            None => Some(0),
        }
    }

    fn list_processes(&self, filter: &str) -> Vec<ProcessInfo> {
        self.listed.lock().unwrap().push(filter.to_string());
        self.processes.lock().unwrap().iter()
            .filter(|p| p.command.contains(filter) || p.name.contains(filter))
            .cloned()
            .collect()
    }

    fn kill_process(&self, pid: u32) -> bool {
        self.killed.lock().unwrap().push(pid);
        let mut processes = self.processes.lock().unwrap();
        let before = processes.len();
        processes.retain(|p| p.pid != pid);
        processes.len() != before
    }
}
