//! Process handle — owns one spawned engine process and its line streams.
//!
//! Stdout and stderr are read line-by-line on background tasks and delivered
//! in arrival order through [`ProcessHandle::next_event`]. The exit event is
//! delivered exactly once, after all output, and the handle is fused
//! afterwards.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::error::{ProcessError, SpawnError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A structured event from the child process.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One complete line from stdout, without the terminator.
    Stdout(String),
    /// One complete line from stderr, without the terminator.
    Stderr(String),
    /// The process exited. Delivered once, after all output lines.
    Exited(Option<i32>),
}

/// Owns a spawned engine process: its stdin writer, line-buffered
/// stdout/stderr readers, and the exit signal.
///
/// Holding a handle holds OS resources. Teardown paths call
/// [`ProcessHandle::release`]; `kill_on_drop` is only the backstop against
/// leaks on panic paths.
pub struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    events: mpsc::Receiver<ProcessEvent>,
    /// `Some` once the exit event has been delivered; the handle is fused.
    exit_code: Option<Option<i32>>,
}

impl ProcessHandle {
    /// Spawn `exe` with the given arguments, working directory, and extra
    /// environment. All three standard streams are piped.
    pub fn spawn(
        exe: &Path,
        args: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> Result<Self, SpawnError> {
        let spawn_error = |source: std::io::Error| SpawnError {
            exe: exe.display().to_string(),
            source,
        };

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("no stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("no stderr pipe")))?;

        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let out_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if out_tx.send(ProcessEvent::Stdout(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("engine stdout read error: {e}");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(ProcessEvent::Stderr(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("engine stderr read error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            events,
            exit_code: None,
        })
    }

    /// OS process id, while the process is still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Append `text` plus a newline to the process stdin.
    pub async fn write_line(&mut self, text: &str) -> Result<(), ProcessError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ProcessError::Exited);
        };
        if let Err(e) = write_all_line(stdin, text).await {
            // A failed write means the process is gone; refuse further writes.
            self.stdin = None;
            return Err(ProcessError::BrokenPipe(e));
        }
        Ok(())
    }

    /// Close stdin, signalling EOF to the child. Used by validation runs once
    /// the document context has been fed.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Next event, in arrival order. Once both output streams hit EOF the
    /// process is reaped and [`ProcessEvent::Exited`] is returned; after
    /// that, every call returns the same `Exited` event.
    pub async fn next_event(&mut self) -> ProcessEvent {
        if let Some(code) = self.exit_code {
            return ProcessEvent::Exited(code);
        }
        match self.events.recv().await {
            Some(event) => event,
            None => {
                let code = match self.child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::debug!("waiting on engine process failed: {e}");
                        None
                    }
                };
                self.exit_code = Some(code);
                self.stdin = None;
                ProcessEvent::Exited(code)
            }
        }
    }

    /// Non-blocking drain of already-buffered output lines.
    pub fn try_next_event(&mut self) -> Option<ProcessEvent> {
        self.events.try_recv().ok()
    }

    /// Kill the process and drop the streams.
    pub async fn release(mut self) {
        self.stdin = None;
        if self.exit_code.is_none()
            && let Err(e) = self.child.kill().await
        {
            tracing::debug!("killing engine process failed: {e}");
        }
    }
}

async fn write_all_line(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn spawn_sh(script: &str) -> ProcessHandle {
        ProcessHandle::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
            Path::new("/"),
            &HashMap::new(),
        )
        .expect("sh should spawn")
    }

    #[test]
    fn test_spawn_missing_executable_fails() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let result = ProcessHandle::spawn(
            Path::new("/definitely/not/a/real/engine"),
            &[],
            Path::new("/"),
            &HashMap::new(),
        );
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("/definitely/not/a/real/engine"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_lines_in_order_then_exit() {
        let mut handle = spawn_sh("echo one; echo two");
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stdout("one".to_string())
        );
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stdout("two".to_string())
        );
        assert_eq!(handle.next_event().await, ProcessEvent::Exited(Some(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_event_is_fused() {
        let mut handle = spawn_sh("exit 3");
        assert_eq!(handle.next_event().await, ProcessEvent::Exited(Some(3)));
        assert_eq!(handle.next_event().await, ProcessEvent::Exited(Some(3)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_lines_are_tagged() {
        let mut handle = spawn_sh("echo oops >&2; exit 2");
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stderr("oops".to_string())
        );
        assert_eq!(handle.next_event().await, ProcessEvent::Exited(Some(2)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_passes_extra_environment() {
        let mut env = HashMap::new();
        env.insert("PSL_BRIDGE_MARKER".to_string(), "forty-two".to_string());
        let mut handle = ProcessHandle::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo $PSL_BRIDGE_MARKER".to_string()],
            Path::new("/"),
            &env,
        )
        .expect("sh should spawn");
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stdout("forty-two".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_line_roundtrip() {
        let mut handle = spawn_sh(r#"while read line; do echo "got:$line"; done"#);
        handle.write_line("hello").await.unwrap();
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stdout("got:hello".to_string())
        );
        handle.release().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_after_exit_is_refused() {
        let mut handle = spawn_sh("exit 0");
        assert_eq!(handle.next_event().await, ProcessEvent::Exited(Some(0)));
        assert!(matches!(
            handle.write_line("too late").await,
            Err(ProcessError::Exited)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_stdin_sends_eof() {
        let mut handle = spawn_sh("cat");
        handle.write_line("a").await.unwrap();
        handle.close_stdin();
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stdout("a".to_string())
        );
        assert_eq!(handle.next_event().await, ProcessEvent::Exited(Some(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_kills_running_process() {
        let handle = spawn_sh("sleep 30");
        // Must return promptly instead of waiting out the sleep.
        tokio::time::timeout(std::time::Duration::from_secs(5), handle.release())
            .await
            .expect("release should not hang");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_try_next_event_drains_buffered_lines() {
        let mut handle = spawn_sh("echo buffered");
        // Wait for the line to arrive through the blocking API first.
        assert_eq!(
            handle.next_event().await,
            ProcessEvent::Stdout("buffered".to_string())
        );
        // Nothing further is buffered until exit is reaped.
        assert!(handle.try_next_event().is_none());
    }
}
