use std::ffi::OsString;
use std::path::Path;

use crate::command::GitCli;
use crate::error::GitError;

#[cfg(unix)]
const NULL_DEVICE: &str = "/dev/null";
#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";

/// Unified diff between `base` and `target`.
///
/// With a live `worktree_path` the worktree (committed and uncommitted state)
/// is diffed against `base` instead, and every untracked file is appended as a
/// diff against an empty file so brand-new files show up.
pub fn get_diff(
    repo_path: &Path,
    base: &str,
    target: &str,
    worktree_path: Option<&Path>,
    git: &GitCli,
) -> Result<String, GitError> {
    match worktree_path.filter(|path| path.exists()) {
        Some(worktree) => worktree_diff(worktree, base, git),
        None => {
            let range = format!("{base}...{target}");
            let output = git.run(repo_path, "diff", ["diff", range.as_str()])?;
            Ok(output.stdout)
        }
    }
}

fn worktree_diff(worktree: &Path, base: &str, git: &GitCli) -> Result<String, GitError> {
    let tracked = git.run(worktree, "diff", ["diff", base])?;
    let mut diff = tracked.stdout;

    for file in untracked_files(worktree, git)? {
        let patch = untracked_file_diff(worktree, &file, git)?;
        if patch.is_empty() {
            continue;
        }
        if !diff.is_empty() && !diff.ends_with('\n') {
            diff.push('\n');
        }
        diff.push_str(&patch);
    }

    Ok(diff)
}

pub fn untracked_files(worktree: &Path, git: &GitCli) -> Result<Vec<String>, GitError> {
    let output = git.run(
        worktree,
        "list untracked files",
        ["ls-files", "-z", "--others", "--exclude-standard"],
    )?;
    // NUL-separated output keeps paths verbatim instead of C-quoting them.
    Ok(output
        .stdout
        .split('\0')
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect())
}

fn untracked_file_diff(worktree: &Path, file: &str, git: &GitCli) -> Result<String, GitError> {
    let args = vec![
        OsString::from("diff"),
        OsString::from("--no-index"),
        OsString::from("--"),
        OsString::from(NULL_DEVICE),
        OsString::from(file),
    ];
    // `--no-index` exits 1 when the inputs differ.
    let output = git.run_accepting(worktree, "diff untracked file", args, &[0, 1])?;
    Ok(output.stdout)
}
