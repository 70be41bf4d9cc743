//! Lifecycle hooks (setup/start/stop/cleanup) run through a login shell.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    Setup,
    Start,
    Stop,
    Cleanup,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub success: bool,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRunner {
    pub shell: PathBuf,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("bash"),
        }
    }
}

impl ScriptRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run `script` with `<shell> -lc` in `cwd` and capture its output.
    pub async fn run(&self, cwd: &Path, script: &str) -> Result<ScriptOutput, ScriptError> {
        let rendered = format!("{} -lc {script}", self.shell.display());
        debug!(command = %rendered, cwd = %cwd.display(), "running script");

        let output = Command::new(&self.shell)
            .arg("-lc")
            .arg(script)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScriptError::Io {
                command: rendered.clone(),
                source,
            })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| ScriptError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| ScriptError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        Ok(ScriptOutput {
            success: output.status.success(),
            command: rendered,
            stdout,
            stderr,
            exit_code: output.status.code(),
        })
    }

    /// Run an optional hook; a missing or blank script is skipped and every
    /// failure is logged rather than returned.
    pub async fn run_hook(
        &self,
        kind: ScriptKind,
        cwd: &Path,
        script: Option<&str>,
    ) -> Option<ScriptOutput> {
        let script = script.map(str::trim).filter(|script| !script.is_empty())?;

        match self.run(cwd, script).await {
            Ok(output) if output.success => {
                info!(hook = %kind, cwd = %cwd.display(), "lifecycle script finished");
                Some(output)
            }
            Ok(output) => {
                warn!(
                    hook = %kind,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "lifecycle script failed"
                );
                Some(output)
            }
            Err(err) => {
                warn!(hook = %kind, error = %err, "lifecycle script could not run");
                None
            }
        }
    }
}
