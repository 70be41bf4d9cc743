use std::ffi::OsString;
use std::path::Path;

use crate::command::GitCli;
use crate::error::GitError;

/// Create `name` at `base` (or HEAD) without checking it out, leaving it free
/// for a worktree to attach.
pub fn create_branch(
    repo_path: &Path,
    name: &str,
    base: Option<&str>,
    git: &GitCli,
) -> Result<(), GitError> {
    let mut args = vec![OsString::from("branch"), OsString::from(name)];
    if let Some(base) = base.filter(|value| !value.trim().is_empty()) {
        args.push(OsString::from(base));
    }
    git.run(repo_path, "create branch", args)?;
    Ok(())
}

pub fn delete_branch(
    repo_path: &Path,
    name: &str,
    force: bool,
    git: &GitCli,
) -> Result<(), GitError> {
    let flag = if force { "-D" } else { "-d" };
    git.run(repo_path, "delete branch", ["branch", flag, name])?;
    Ok(())
}

pub fn branch_exists(repo_path: &Path, name: &str, git: &GitCli) -> Result<bool, GitError> {
    let reference = format!("refs/heads/{name}");
    match git.run(
        repo_path,
        "verify branch",
        ["rev-parse", "--verify", "--quiet", reference.as_str()],
    ) {
        Ok(_) => Ok(true),
        Err(GitError::CommandFailed { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Local branch names, sorted by git.
pub fn list_branches(repo_path: &Path, git: &GitCli) -> Result<Vec<String>, GitError> {
    let output = git.run(
        repo_path,
        "list branches",
        ["branch", "--list", "--format=%(refname:short)"],
    )?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn current_branch(repo_path: &Path, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(repo_path, "read current branch", ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}
