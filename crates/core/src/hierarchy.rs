#![forbid(unsafe_code)]

//! Materialized hierarchy paths: `/`-separated task ids from the root down,
//! e.g. `/task-000001/task-000004`. The level of a task equals its segment
//! count minus one, so roots sit at level 0.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathError {
    Empty,
    MissingLeadingSlash,
    EmptySegment,
    NotAPrefix,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Empty => write!(f, "hierarchy path is empty"),
            PathError::MissingLeadingSlash => write!(f, "hierarchy path must start with '/'"),
            PathError::EmptySegment => write!(f, "hierarchy path contains an empty segment"),
            PathError::NotAPrefix => write!(f, "old prefix does not match the path"),
        }
    }
}

impl std::error::Error for PathError {}

pub fn validate(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PathError::MissingLeadingSlash);
    };
    if rest.is_empty() {
        return Err(PathError::EmptySegment);
    }
    for segment in rest.split('/') {
        if segment.is_empty() {
            return Err(PathError::EmptySegment);
        }
    }
    Ok(())
}

/// Path of a child task given its parent's path (`None` for roots).
pub fn child_path(parent_path: Option<&str>, task_id: &str) -> String {
    match parent_path {
        Some(parent) => format!("{parent}/{task_id}"),
        None => format!("/{task_id}"),
    }
}

pub fn level_of(path: &str) -> i64 {
    path.matches('/').count() as i64 - 1
}

pub fn segments(path: &str) -> Vec<&str> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Ancestor ids, root first, excluding the task itself.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut ids = segments(path);
    ids.pop();
    ids
}

pub fn leaf(path: &str) -> Option<&str> {
    segments(path).last().copied()
}

/// True when `path` lies strictly below `ancestor_path`.
pub fn is_strict_descendant(path: &str, ancestor_path: &str) -> bool {
    path.len() > ancestor_path.len() && path.starts_with(ancestor_path) && {
        path.as_bytes()[ancestor_path.len()] == b'/'
    }
}

/// SQL LIKE pattern matching the strict descendants of `path`.
pub fn descendant_like_pattern(path: &str) -> String {
    let escaped = path.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("{escaped}/%")
}

/// Rewrites `path` from under `old_prefix` to under `new_prefix`.
/// `path` may equal `old_prefix` (the moved task itself).
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Result<String, PathError> {
    if path == old_prefix {
        return Ok(new_prefix.to_string());
    }
    if !is_strict_descendant(path, old_prefix) {
        return Err(PathError::NotAPrefix);
    }
    Ok(format!("{new_prefix}{}", &path[old_prefix.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert_eq!(validate("").unwrap_err(), PathError::Empty);
        assert_eq!(validate("task-1").unwrap_err(), PathError::MissingLeadingSlash);
        assert_eq!(validate("/").unwrap_err(), PathError::EmptySegment);
        assert_eq!(validate("/a//b").unwrap_err(), PathError::EmptySegment);
        assert!(validate("/task-000001").is_ok());
        assert!(validate("/task-000001/task-000004").is_ok());
    }

    #[test]
    fn child_and_level() {
        let root = child_path(None, "task-000001");
        assert_eq!(root, "/task-000001");
        assert_eq!(level_of(&root), 0);

        let child = child_path(Some(&root), "task-000002");
        assert_eq!(child, "/task-000001/task-000002");
        assert_eq!(level_of(&child), 1);
    }

    #[test]
    fn ancestors_exclude_self() {
        let path = "/a/b/c";
        assert_eq!(ancestors(path), vec!["a", "b"]);
        assert_eq!(leaf(path), Some("c"));
        assert!(ancestors("/a").is_empty());
    }

    #[test]
    fn strict_descendants() {
        assert!(is_strict_descendant("/a/b", "/a"));
        assert!(is_strict_descendant("/a/b/c", "/a"));
        assert!(!is_strict_descendant("/a", "/a"));
        assert!(!is_strict_descendant("/ab", "/a"));
        assert!(!is_strict_descendant("/b/a", "/a"));
    }

    #[test]
    fn rebase_moves_subtrees() {
        assert_eq!(rebase("/a/b", "/a/b", "/c/b").expect("self"), "/c/b");
        assert_eq!(
            rebase("/a/b/x", "/a/b", "/c/b").expect("descendant"),
            "/c/b/x"
        );
        assert_eq!(
            rebase("/a/other", "/a/b", "/c/b").unwrap_err(),
            PathError::NotAPrefix
        );
    }

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(descendant_like_pattern("/a"), "/a/%");
        assert_eq!(descendant_like_pattern("/a_b"), "/a\\_b/%");
    }
}
