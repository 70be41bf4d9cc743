use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::branch::{create_branch, delete_branch};
use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
}

/// Attach a new worktree at `worktree_path` to the existing `branch`.
pub fn create_worktree(
    repo_path: &Path,
    worktree_path: &Path,
    branch: &str,
    git: &GitCli,
) -> Result<(), GitError> {
    if let Some(parent) = worktree_path.parent() {
        fs::create_dir_all(parent).map_err(|source| GitError::WorktreeDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let args = vec![
        OsString::from("worktree"),
        OsString::from("add"),
        worktree_path.as_os_str().to_os_string(),
        OsString::from(branch),
    ];
    git.run(repo_path, "add worktree", args)?;
    debug!(path = %worktree_path.display(), branch, "worktree created");
    Ok(())
}

/// Create `branch` at `base` and attach a worktree for it at `worktree_path`.
/// If the worktree cannot be created the new branch is force-deleted, so a
/// retry starts from a clean slate.
pub fn create_branch_worktree(
    repo_path: &Path,
    branch: &str,
    base: Option<&str>,
    worktree_path: &Path,
    git: &GitCli,
) -> Result<(), GitError> {
    create_branch(repo_path, branch, base, git)?;
    if let Err(err) = create_worktree(repo_path, worktree_path, branch, git) {
        if let Err(rollback) = delete_branch(repo_path, branch, true, git) {
            warn!(branch, error = %rollback, "failed to roll back branch");
        }
        return Err(err);
    }
    Ok(())
}

pub fn delete_worktree(
    repo_path: &Path,
    worktree_path: &Path,
    force: bool,
    git: &GitCli,
) -> Result<(), GitError> {
    let mut args = vec![OsString::from("worktree"), OsString::from("remove")];
    if force {
        args.push(OsString::from("--force"));
    }
    args.push(worktree_path.as_os_str().to_os_string());

    git.run(repo_path, "remove worktree", args)?;
    Ok(())
}

/// Drop administrative entries for worktrees whose directories are gone.
pub fn prune_worktrees(repo_path: &Path, git: &GitCli) -> Result<(), GitError> {
    git.run(repo_path, "prune worktrees", ["worktree", "prune"])?;
    Ok(())
}

pub fn list_worktrees(repo_path: &Path, git: &GitCli) -> Result<Vec<ListedWorktree>, GitError> {
    let output = git.run(repo_path, "list worktrees", ["worktree", "list", "--porcelain"])?;
    parse_worktree_list(&output.stdout)
}

/// Directory name for a branch inside the worktree root (`feature/x` -> `feature-x`).
pub fn worktree_dir_name(branch: &str) -> String {
    let mut out = String::with_capacity(branch.len());
    for ch in branch.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|ch| ch == '-' || ch == '.');
    if trimmed.is_empty() {
        "worktree".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Worktree location for `branch` under `root`. Falls back to a name
/// suffixed with `discriminator` when another branch already flattened to
/// the same directory (`feature/x` and `feature-x`).
pub fn available_worktree_path(root: &Path, branch: &str, discriminator: &str) -> PathBuf {
    let name = worktree_dir_name(branch);
    let preferred = root.join(&name);
    if !preferred.exists() {
        return preferred;
    }
    let suffix: String = discriminator
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    let suffix = if suffix.is_empty() { "1" } else { suffix.as_str() };
    root.join(format!("{name}-{suffix}"))
}

fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();

    let mut current_path: Option<PathBuf> = None;
    let mut current_branch: Option<String> = None;
    let mut current_head: Option<String> = None;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(path) = current_path.take() {
                listed.push(ListedWorktree {
                    path,
                    branch: current_branch.take(),
                    head: current_head.take(),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest.trim()));
            continue;
        }
        if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.trim().trim_start_matches("refs/heads/").to_string();
            current_branch = Some(branch);
            continue;
        }
        if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.trim().to_string());
            continue;
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{
        available_worktree_path, create_branch_worktree, create_worktree, delete_worktree,
        list_worktrees, parse_worktree_list, worktree_dir_name,
    };
    use crate::branch::{branch_exists, create_branch};
    use crate::command::GitCli;
    use crate::error::GitError;
    use crate::test_support::{init_repo, unique_temp_dir};

    #[test]
    fn create_and_delete_worktree_for_fresh_branch() {
        let repo = init_repo("wt-lifecycle");
        let root = unique_temp_dir("wt-root");
        let git = GitCli::default();
        let path = root.join("nested").join("feature-x");

        create_branch(&repo, "feature/x", Some("main"), &git).expect("create branch");
        create_worktree(&repo, &path, "feature/x", &git).expect("create worktree");
        assert!(path.join("README.md").exists());

        let listed = list_worktrees(&repo, &git).expect("list worktrees");
        assert!(listed
            .iter()
            .any(|wt| wt.branch.as_deref() == Some("feature/x")));

        fs::write(path.join("dirty.txt"), "untracked\n").expect("dirty worktree");
        assert!(delete_worktree(&repo, &path, false, &git).is_err());
        delete_worktree(&repo, &path, true, &git).expect("force delete");
        assert!(!path.exists());

        let _ = fs::remove_dir_all(repo);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn create_worktree_for_missing_branch_fails_with_action_label() {
        let repo = init_repo("wt-missing");
        let root = unique_temp_dir("wt-missing-root");
        let git = GitCli::default();

        let err = create_worktree(&repo, &root.join("wt"), "nope", &git)
            .expect_err("missing branch must fail");
        assert!(matches!(err, GitError::CommandFailed { action: "add worktree", .. }));

        let _ = fs::remove_dir_all(repo);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn parse_worktree_list_reads_porcelain_blocks() {
        let raw = "worktree /src/app\nHEAD abc123\nbranch refs/heads/main\n\nworktree /src/app/.orch/wt/feature-x\nHEAD def456\nbranch refs/heads/feature/x\n\nworktree /tmp/detached\nHEAD 999\ndetached\n";
        let listed = parse_worktree_list(raw).expect("parse");
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].path, PathBuf::from("/src/app"));
        assert_eq!(listed[1].branch.as_deref(), Some("feature/x"));
        assert_eq!(listed[2].branch, None);
        assert_eq!(listed[2].head.as_deref(), Some("999"));
    }

    #[test]
    fn parse_worktree_list_rejects_garbage() {
        let err = parse_worktree_list("nonsense\n").expect_err("garbage");
        assert!(matches!(err, GitError::Parse { .. }));
        assert!(parse_worktree_list("").expect("empty ok").is_empty());
    }

    #[test]
    fn worktree_dir_name_flattens_branch_separators() {
        assert_eq!(worktree_dir_name("feature/x"), "feature-x");
        assert_eq!(worktree_dir_name("bug fix#12"), "bug-fix-12");
        assert_eq!(worktree_dir_name("///"), "worktree");
    }

    #[test]
    fn failed_worktree_rolls_back_the_new_branch() {
        let repo = init_repo("wt-rollback");
        let root = unique_temp_dir("wt-rollback-root");
        let git = GitCli::default();
        let path = root.join("feature-x");
        fs::create_dir_all(&path).expect("obstacle dir");
        fs::write(path.join("keep.txt"), "occupied
").expect("obstacle file");

        let err = create_branch_worktree(&repo, "feature/x", Some("main"), &path, &git)
            .expect_err("occupied directory");
        assert!(matches!(err, GitError::CommandFailed { action: "add worktree", .. }));
        assert!(!branch_exists(&repo, "feature/x", &git).expect("branch lookup"));

        fs::remove_dir_all(&path).expect("clear obstacle");
        create_branch_worktree(&repo, "feature/x", Some("main"), &path, &git).expect("retry");
        assert!(path.join("README.md").exists());

        let _ = fs::remove_dir_all(repo);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn colliding_branch_names_get_distinct_directories() {
        let root = unique_temp_dir("wt-collide");
        assert_eq!(
            available_worktree_path(&root, "feature/x", "task-1"),
            root.join("feature-x")
        );

        fs::create_dir_all(root.join("feature-x")).expect("taken");
        assert_eq!(
            available_worktree_path(&root, "feature-x", "3f2a9c41-77d0"),
            root.join("feature-x-3f2a9c41")
        );
        assert_eq!(
            available_worktree_path(&root, "feature-x", "--"),
            root.join("feature-x-1")
        );

        let _ = fs::remove_dir_all(root);
    }
}
