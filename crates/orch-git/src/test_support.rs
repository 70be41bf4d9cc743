//! Throwaway repositories for tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

/// Create a fresh, empty directory under the system temp dir.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let nonce = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("orch-git-{prefix}-{now}-{nonce}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

/// Run git with a fixed identity and panic on failure.
pub fn run_git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Initialize a repository whose `main` branch holds a single commit with `README.md`.
pub fn init_repo(prefix: &str) -> PathBuf {
    let root = unique_temp_dir(prefix);
    run_git(&root, &["init", "--quiet"]);
    run_git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(root.join("README.md"), "init\n").expect("write README");
    run_git(&root, &["add", "README.md"]);
    run_git(&root, &["commit", "--quiet", "-m", "init"]);
    root
}
