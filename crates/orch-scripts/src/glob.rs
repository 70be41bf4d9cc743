//! Glob matching for `copyFiles` entries.
//!
//! `*` and `?` stop at `/`, `**` crosses directories, and a leading `**/`
//! also matches at the root.

/// Parse a newline-separated pattern list, dropping blanks and `#` comments.
pub fn parse_patterns(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(normalize_path)
        .filter(|line| !line.is_empty())
        .collect()
}

/// True when `path` (relative, `/`-separated) matches any of `patterns`.
pub fn matches_any(patterns: &[String], path: &str) -> bool {
    let path = normalize_path(path);
    patterns.iter().any(|pattern| pattern_matches(pattern, &path))
}

pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern = normalize_path(pattern);
    let core = pattern.trim_end_matches('/');
    if core.is_empty() {
        return false;
    }

    if pattern.ends_with('/') {
        // Directory entry: copy everything beneath it.
        let under = format!("{core}/**");
        return pattern_variants(&under)
            .iter()
            .any(|variant| glob_match(variant, path));
    }

    pattern_variants(core)
        .iter()
        .any(|variant| glob_match(variant, path))
}

/// True when the pattern carries no wildcard and names exactly one path.
pub fn is_literal(pattern: &str) -> bool {
    !pattern.contains(['*', '?'])
}

fn normalize_path(path: &str) -> String {
    let normalized = path.trim().replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");
    normalized.trim_start_matches('/').to_string()
}

fn pattern_variants(pattern: &str) -> Vec<&str> {
    let mut variants = vec![pattern];
    if let Some(stripped) = pattern.strip_prefix("**/") {
        variants.push(stripped);
    }
    variants
}

pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let cols = txt.len() + 1;
    let mut memo: Vec<Option<bool>> = vec![None; (pat.len() + 1) * cols];
    glob_match_inner(&pat, &txt, 0, 0, cols, &mut memo)
}

fn glob_match_inner(
    pattern: &[char],
    text: &[char],
    pi: usize,
    ti: usize,
    cols: usize,
    memo: &mut [Option<bool>],
) -> bool {
    let key = pi * cols + ti;
    if let Some(cached) = memo[key] {
        return cached;
    }

    let result = match pattern.get(pi) {
        None => ti == text.len(),
        Some('*') if pattern.get(pi + 1) == Some(&'*') => {
            let mut next = pi + 2;
            while pattern.get(next) == Some(&'*') {
                next += 1;
            }
            glob_match_inner(pattern, text, next, ti, cols, memo)
                || (ti < text.len() && glob_match_inner(pattern, text, pi, ti + 1, cols, memo))
        }
        Some('*') => {
            glob_match_inner(pattern, text, pi + 1, ti, cols, memo)
                || (ti < text.len()
                    && text[ti] != '/'
                    && glob_match_inner(pattern, text, pi, ti + 1, cols, memo))
        }
        Some('?') => {
            ti < text.len()
                && text[ti] != '/'
                && glob_match_inner(pattern, text, pi + 1, ti + 1, cols, memo)
        }
        Some(token) => {
            ti < text.len()
                && *token == text[ti]
                && glob_match_inner(pattern, text, pi + 1, ti + 1, cols, memo)
        }
    };

    memo[key] = Some(result);
    result
}
