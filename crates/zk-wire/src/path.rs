// Node path helpers: validation, root-relative normalization and ancestry.
use crate::{Error, Result};

pub const ROOT: &str = "/";

/// Checks a node path the way the server would before accepting it.
///
/// The empty string is allowed and means "the configured root".
pub fn validate(path: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if path.is_empty() || path == ROOT {
        return Ok(());
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(invalid("trailing slash".to_string()));
    }
    for (index, c) in path.char_indices() {
        if matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}'..='\u{9f}' | '\u{e000}'..='\u{f8ff}' | '\u{fff0}'..='\u{10ffff}')
        {
            return Err(invalid(format!("invalid character at {index}")));
        }
    }
    let body = path.strip_prefix('/').unwrap_or(path);
    for segment in body.split('/') {
        match segment {
            "" => return Err(invalid("empty node name".to_string())),
            "." | ".." => return Err(invalid("relative paths not allowed".to_string())),
            _ => {}
        }
    }
    Ok(())
}

/// Joins `path` under `root`, collapsing the slash between them.
///
/// ```
/// use zk_wire::path::normalize;
///
/// assert_eq!(normalize("/", ""), "/");
/// assert_eq!(normalize("/", "a/b"), "/a/b");
/// assert_eq!(normalize("/app/", "/a"), "/app/a");
/// assert_eq!(normalize("app", "/"), "/app");
/// ```
pub fn normalize(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let mut out = String::with_capacity(root.len() + path.len() + 2);
    if !root.is_empty() {
        if !root.starts_with('/') {
            out.push('/');
        }
        out.push_str(root);
    }
    if !path.is_empty() {
        out.push('/');
        out.push_str(path);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Joins several segments; empty segments are skipped.
pub fn combine<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|part| !part.is_empty())
        .fold(String::new(), |acc, part| {
            if acc.is_empty() {
                part.to_string()
            } else {
                match (acc.ends_with('/'), part.starts_with('/')) {
                    (true, true) => format!("{acc}{}", &part[1..]),
                    (false, false) => format!("{acc}/{part}"),
                    _ => format!("{acc}{part}"),
                }
            }
        })
}

/// Maps a server-absolute path back under `root`. Paths outside the root
/// are returned unchanged.
pub fn strip_root<'a>(root: &str, path: &'a str) -> &'a str {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path;
    }
    match path.strip_prefix(root) {
        Some("") => ROOT,
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(index) => Some(&path[..index]),
        None => None,
    }
}

/// `path`, then each ancestor up to and including `/`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |current| parent(*current))
}

pub fn max_size(root: &str, path: &str) -> usize {
    crate::LENGTH_SIZE + root.len() + path.len() + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_against_root() {
        assert_eq!(normalize("", ""), "/");
        assert_eq!(normalize("/", "/"), "/");
        assert_eq!(normalize("/app", ""), "/app");
        assert_eq!(normalize("/app", "/"), "/app");
        assert_eq!(normalize("/app", "x/y"), "/app/x/y");
        assert_eq!(normalize("/app/", "/x"), "/app/x");
    }

    #[test]
    fn combines_segments() {
        assert_eq!(combine(&["/a", "b", "/c/", "/d"]), "/a/b/c/d");
        assert_eq!(combine(&["", "/a"]), "/a");
    }

    #[test]
    fn rejects_invalid_paths() {
        for bad in ["/a//b", "/a/", "/a/./b", "/a/..", "/a\u{1}"] {
            let err = validate(bad).expect_err(bad);
            assert!(matches!(err, Error::InvalidPath { .. }));
        }
        for good in ["", "/", "/a", "a/b", "/a/.b", "/a..b"] {
            validate(good).expect(good);
        }
    }

    #[test]
    fn walks_ancestors_to_root() {
        let all: Vec<_> = ancestors("/a/b/c").collect();
        assert_eq!(all, vec!["/a/b/c", "/a/b", "/a", "/"]);
        assert_eq!(ancestors("/").collect::<Vec<_>>(), vec!["/"]);
    }

    #[test]
    fn strips_root_prefix() {
        assert_eq!(strip_root("/app", "/app/x"), "/x");
        assert_eq!(strip_root("/app", "/app"), "/");
        assert_eq!(strip_root("/app", "/apple"), "/apple");
        assert_eq!(strip_root("/", "/x"), "/x");
    }
}
