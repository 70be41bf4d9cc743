use std::path::Path;

use crate::command::GitCli;
use crate::error::GitError;

/// URL configured for `remote`, or `None` when the remote does not exist.
pub fn get_remote_url(
    repo_path: &Path,
    remote: &str,
    git: &GitCli,
) -> Result<Option<String>, GitError> {
    match git.run(repo_path, "read remote url", ["remote", "get-url", remote]) {
        Ok(output) => {
            let url = output.stdout.trim();
            Ok((!url.is_empty()).then(|| url.to_string()))
        }
        Err(GitError::CommandFailed { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Translate a clone URL into the hosting site's browsable `https://` URL.
///
/// Handles scp-style (`git@host:owner/repo.git`), `ssh://`, `git://` and
/// `http(s)://` remotes; returns `None` for local paths.
pub fn remote_to_web_url(remote_url: &str) -> Option<String> {
    let url = remote_url.trim();
    if url.is_empty() {
        return None;
    }

    let (host, path) = if let Some(rest) = strip_scheme(url) {
        let rest = rest.rsplit_once('@').map_or(rest, |(_, tail)| tail);
        let (authority, path) = rest.split_once('/')?;
        let host = authority.split(':').next().unwrap_or(authority);
        (host.to_string(), path.to_string())
    } else if !url.starts_with('/') && !url.starts_with('.') && url.contains(':') {
        let rest = url.rsplit_once('@').map_or(url, |(_, tail)| tail);
        let (host, path) = rest.split_once(':')?;
        (host.to_string(), path.to_string())
    } else {
        return None;
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("https://{host}/{path}"))
}

fn strip_scheme(url: &str) -> Option<&str> {
    ["https://", "http://", "ssh://", "git://", "git+ssh://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))
}
