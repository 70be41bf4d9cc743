use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ScriptError;
use crate::glob::{is_literal, matches_any, parse_patterns};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Copy every file under `source_root` matching the newline-separated
/// `patterns` into the same relative location under `dest_root`.
///
/// Individual copy failures are collected in the report; only a failure to
/// read `source_root` itself is returned as an error.
pub fn copy_files(
    source_root: &Path,
    dest_root: &Path,
    patterns: &str,
) -> Result<CopyReport, ScriptError> {
    let patterns = parse_patterns(patterns);
    let mut report = CopyReport::default();
    if patterns.is_empty() {
        return Ok(report);
    }

    let mut candidates = Vec::new();
    let (literals, globs): (Vec<String>, Vec<String>) =
        patterns.into_iter().partition(|pattern| is_literal(pattern));

    for literal in literals {
        let relative = PathBuf::from(literal.trim_end_matches('/'));
        let absolute = source_root.join(&relative);
        if absolute.is_dir() {
            collect_files(source_root, &absolute, &mut candidates)?;
        } else if absolute.is_file() {
            candidates.push(relative);
        } else {
            debug!(path = %absolute.display(), "copy entry does not exist");
        }
    }

    if !globs.is_empty() {
        let mut all = Vec::new();
        collect_files(source_root, source_root, &mut all)?;
        candidates.extend(
            all.into_iter()
                .filter(|relative| matches_any(&globs, &relative_str(relative))),
        );
    }

    candidates.sort();
    candidates.dedup();

    for relative in candidates {
        let from = source_root.join(&relative);
        let to = dest_root.join(&relative);
        match copy_one(&from, &to) {
            Ok(()) => report.copied.push(relative),
            Err(err) => {
                warn!(error = %err, "failed to copy file into worktree");
                report.failed.push((relative, err.to_string()));
            }
        }
    }

    Ok(report)
}

/// [`copy_files`] with every failure logged instead of returned.
pub fn copy_files_best_effort(source_root: &Path, dest_root: &Path, patterns: Option<&str>) {
    let Some(patterns) = patterns.filter(|raw| !raw.trim().is_empty()) else {
        return;
    };
    match copy_files(source_root, dest_root, patterns) {
        Ok(report) => debug!(
            copied = report.copied.len(),
            failed = report.failed.len(),
            dest = %dest_root.display(),
            "copied configured files"
        ),
        Err(err) => warn!(error = %err, "copy files skipped"),
    }
}

fn copy_one(from: &Path, to: &Path) -> Result<(), ScriptError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| ScriptError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
    }
    fs::copy(from, to).map_err(|source| ScriptError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ScriptError> {
    let entries = fs::read_dir(dir).map_err(|source| ScriptError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }

    Ok(())
}

fn relative_str(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
