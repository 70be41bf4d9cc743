use std::path::PathBuf;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {action} failed to start ({command}): {source}")]
    Io {
        action: &'static str,
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {action} failed ({command}) status={status:?}: {}", .stderr.trim())]
    CommandFailed {
        action: &'static str,
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git {action} output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        action: &'static str,
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("failed to prepare worktree directory {path}: {source}")]
    WorktreeDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

impl GitError {
    /// Captured stderr for command failures; empty for other variants.
    pub fn stderr(&self) -> &str {
        match self {
            GitError::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GitError;
    use std::error::Error;

    #[test]
    fn io_variant_includes_action_command_and_io_message() {
        let err = GitError::Io {
            action: "create branch",
            command: "git branch feature/x".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary"),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git create branch failed to start (git branch feature/x)"));
        assert!(rendered.contains("missing binary"));
        assert!(err.source().is_some());
    }

    #[test]
    fn command_failed_variant_mentions_action_status_and_stderr() {
        let err = GitError::CommandFailed {
            action: "add worktree",
            command: "git worktree add /tmp/wt feature/x".to_string(),
            status: Some(128),
            stdout: String::new(),
            stderr: "fatal: 'feature/x' is already checked out\n".to_string(),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git add worktree failed"));
        assert!(rendered.contains("status=Some(128)"));
        assert!(rendered.ends_with("fatal: 'feature/x' is already checked out"));
        assert_eq!(err.stderr(), "fatal: 'feature/x' is already checked out\n");
    }

    #[test]
    fn non_utf8_variant_mentions_stream_and_has_source() {
        let utf8_err = String::from_utf8(vec![0x80]).expect_err("invalid utf-8 bytes");
        let err = GitError::NonUtf8Output {
            action: "diff",
            command: "git diff".to_string(),
            stream: "stdout",
            source: utf8_err,
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git diff output was not valid UTF-8"));
        assert!(rendered.contains("(git diff, stdout)"));
        assert!(err.source().is_some());
        assert_eq!(err.stderr(), "");
    }
}
