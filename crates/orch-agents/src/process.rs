//! Child process plumbing shared by every adapter.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use orch_core::types::LogType;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::RunControl;
use crate::error::ExecutorError;
use crate::framing::LineBuffer;

/// Exit code reported when the process was killed or its status is unknown.
pub const KILLED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLine {
    pub stream: LogType,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl SpawnSpec {
    pub fn new(binary: impl Into<PathBuf>, cwd: &Path) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A running agent: its stdin, framed output lines, and exit code.
///
/// The line channel closes once both stdout and stderr reach EOF. The exit
/// receiver resolves with the real exit code, or [`KILLED_EXIT_CODE`] when the
/// kill token fired first.
#[derive(Debug)]
pub struct AgentProcess {
    pub stdin: ChildStdin,
    pub lines: mpsc::UnboundedReceiver<StreamLine>,
    pub exit: oneshot::Receiver<i32>,
    pub pid: Option<u32>,
}

pub fn spawn_agent(spec: &SpawnSpec, kill: CancellationToken) -> Result<AgentProcess, ExecutorError> {
    debug!(binary = %spec.binary.display(), args = ?spec.args, cwd = %spec.cwd.display(), "spawning agent");

    let mut child = Command::new(&spec.binary)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            binary: spec.binary.clone(),
            source,
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or(ExecutorError::MissingPipe { stream: "stdin" })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(ExecutorError::MissingPipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(ExecutorError::MissingPipe { stream: "stderr" })?;
    let pid = child.id();

    let (line_tx, lines) = mpsc::unbounded_channel();
    tokio::spawn(read_stream(stdout, LogType::Stdout, line_tx.clone()));
    tokio::spawn(read_stream(stderr, LogType::Stderr, line_tx));

    let (exit_tx, exit) = oneshot::channel();
    tokio::spawn(async move {
        let code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(KILLED_EXIT_CODE),
                Err(err) => {
                    warn!(error = %err, "failed to wait for agent process");
                    KILLED_EXIT_CODE
                }
            },
            _ = kill.cancelled() => {
                if let Err(err) = child.kill().await {
                    debug!(error = %err, "agent process already gone");
                }
                KILLED_EXIT_CODE
            }
        };
        let _ = exit_tx.send(code);
    });

    Ok(AgentProcess {
        stdin,
        lines,
        exit,
        pid,
    })
}

async fn read_stream<R>(mut reader: R, stream: LogType, tx: mpsc::UnboundedSender<StreamLine>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut chunk = [0_u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                for text in buffer.push(&chunk[..read]) {
                    let _ = tx.send(StreamLine { stream, text });
                }
            }
            Err(err) => {
                debug!(error = %err, %stream, "agent stream read failed");
                break;
            }
        }
    }
    if let Some(text) = buffer.finish() {
        let _ = tx.send(StreamLine { stream, text });
    }
}

/// Write `text` followed by a newline and flush.
pub async fn write_line<W>(writer: &mut W, text: &str) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Pull every line still buffered after exit, giving the readers up to
/// `grace` to hit EOF.
pub async fn drain_lines(
    lines: &mut mpsc::UnboundedReceiver<StreamLine>,
    grace: Duration,
) -> Vec<StreamLine> {
    let mut drained = Vec::new();
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, lines.recv()).await {
            Ok(Some(line)) => drained.push(line),
            Ok(None) => break,
            Err(_) => {
                debug!(drained = drained.len(), "output drain grace elapsed");
                break;
            }
        }
    }
    drained
}

/// Protocol-specific handling of framed output lines.
#[async_trait]
pub trait LineHandler: Send {
    /// Process one line. Returns true once the agent signalled completion
    /// and the run has been closed with [`RunControl::complete`].
    async fn handle_line(&mut self, line: StreamLine) -> bool;

    /// Runs once the process is gone (or completed), before the exit code is
    /// reported.
    async fn on_exit(&mut self) {}
}

/// Feed every line to `handler` until completion or process exit, then
/// report the exit code unless the run already finished.
pub async fn pump_lines<H>(
    mut lines: mpsc::UnboundedReceiver<StreamLine>,
    mut exit: oneshot::Receiver<i32>,
    control: &RunControl,
    grace: Duration,
    handler: &mut H,
) where
    H: LineHandler,
{
    let code = loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    if handler.handle_line(line).await {
                        handler.on_exit().await;
                        return;
                    }
                }
                None => break (&mut exit).await.unwrap_or(KILLED_EXIT_CODE),
            },
            code = &mut exit => {
                let code = code.unwrap_or(KILLED_EXIT_CODE);
                for line in drain_lines(&mut lines, grace).await {
                    if handler.handle_line(line).await {
                        handler.on_exit().await;
                        return;
                    }
                }
                break code;
            }
        }
    };

    handler.on_exit().await;
    control.exit(code);
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use orch_core::types::LogType;
    use tokio_util::sync::CancellationToken;

    use super::{drain_lines, spawn_agent, SpawnSpec, KILLED_EXIT_CODE};
    use crate::error::ExecutorError;

    #[tokio::test]
    async fn frames_both_streams_and_flushes_partial_line() {
        let spec = SpawnSpec::new("sh", Path::new("/tmp"))
            .arg("-c")
            .arg("printf 'one\\ntwo'; printf 'err\\n' >&2; exit 4");
        let mut process = spawn_agent(&spec, CancellationToken::new()).expect("spawn");

        let code = (&mut process.exit).await.expect("exit code");
        assert_eq!(code, 4);

        let lines = drain_lines(&mut process.lines, Duration::from_secs(2)).await;
        let stdout: Vec<_> = lines
            .iter()
            .filter(|line| line.stream == LogType::Stdout)
            .map(|line| line.text.as_str())
            .collect();
        assert_eq!(stdout, vec!["one", "two"]);
        assert!(lines
            .iter()
            .any(|line| line.stream == LogType::Stderr && line.text == "err"));
    }

    #[tokio::test]
    async fn kill_token_terminates_process() {
        let kill = CancellationToken::new();
        let spec = SpawnSpec::new("sh", Path::new("/tmp"))
            .arg("-c")
            .arg("sleep 30");
        let process = spawn_agent(&spec, kill.clone()).expect("spawn");

        kill.cancel();
        let code = tokio::time::timeout(Duration::from_secs(5), process.exit)
            .await
            .expect("exit within timeout")
            .expect("exit code");
        assert_eq!(code, KILLED_EXIT_CODE);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let spec = SpawnSpec::new("/nonexistent/agent", Path::new("/tmp"));
        let err = spawn_agent(&spec, CancellationToken::new()).expect_err("spawn fails");
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }
}
