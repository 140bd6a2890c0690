//! Request classification between Git smart-HTTP and the LFS API.
//!
//! Both surfaces share the `/<repo>/...` URL space, so every request is
//! classified once, before any other routing.

/// Where a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Forward to the Git smart-HTTP backend process.
    SmartHttp,
    /// Serve from the LFS REST handlers.
    Lfs,
}

/// Path suffixes served by `git http-backend`, each following exactly one
/// repository segment. Checked in order.
const ROUTES: &[(&[&str], Target)] = &[
    (&["info", "refs"], Target::SmartHttp),
    (&["git-receive-pack"], Target::SmartHttp),
    (&["git-upload-pack"], Target::SmartHttp),
];

/// Classify a request path (no query string).
///
/// A pattern matches only when the path is `/`, one non-empty repository
/// segment, then the pattern's segments with nothing before or after.
pub fn route(path: &str) -> Target {
    let Some(rest) = path.strip_prefix('/') else {
        return Target::Lfs;
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let Some((repo, suffix)) = segments.split_first() else {
        return Target::Lfs;
    };
    if repo.is_empty() {
        return Target::Lfs;
    }

    ROUTES
        .iter()
        .find(|(pattern, _)| *pattern == suffix)
        .map(|(_, target)| *target)
        .unwrap_or(Target::Lfs)
}

/// Repository segment of a path, if it has one.
pub fn repo_of(path: &str) -> Option<&str> {
    path.strip_prefix('/')?
        .split('/')
        .next()
        .filter(|repo| !repo.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smart_http_paths() {
        assert_eq!(route("/myrepo/info/refs"), Target::SmartHttp);
        assert_eq!(route("/myrepo/git-upload-pack"), Target::SmartHttp);
        assert_eq!(route("/myrepo/git-receive-pack"), Target::SmartHttp);
        assert_eq!(route("/repo.git/info/refs"), Target::SmartHttp);
    }

    #[test]
    fn lfs_paths() {
        assert_eq!(route("/myrepo/info/lfs/objects/batch"), Target::Lfs);
        assert_eq!(route("/myrepo/info/lfs/objects"), Target::Lfs);
        assert_eq!(route("/myrepo/info/lfs/objects/deadbeef01"), Target::Lfs);
        assert_eq!(route("/myrepo/lfs/deadbeef01"), Target::Lfs);
    }

    #[test]
    fn exact_match_only() {
        // Nested repository path: more than one segment before the suffix.
        assert_eq!(route("/group/myrepo/info/refs"), Target::Lfs);
        // Missing repository segment.
        assert_eq!(route("/info/refs"), Target::Lfs);
        assert_eq!(route("//info/refs"), Target::Lfs);
        // Trailing content.
        assert_eq!(route("/myrepo/info/refs/extra"), Target::Lfs);
        assert_eq!(route("/myrepo/git-upload-pack/"), Target::Lfs);
        // Substring is not enough.
        assert_eq!(route("/myrepo/xgit-upload-pack"), Target::Lfs);
        assert_eq!(route("myrepo/info/refs"), Target::Lfs);
        assert_eq!(route("/"), Target::Lfs);
        assert_eq!(route(""), Target::Lfs);
    }

    #[test]
    fn repo_segment() {
        assert_eq!(repo_of("/myrepo/info/refs"), Some("myrepo"));
        assert_eq!(repo_of("/myrepo"), Some("myrepo"));
        assert_eq!(repo_of("//info/refs"), None);
        assert_eq!(repo_of("no-slash"), None);
    }
}
