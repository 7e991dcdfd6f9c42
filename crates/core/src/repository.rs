//! Repository name helpers.

/// Split a repository path into `(project, rest)` at the first `/`.
///
/// Leading and trailing slashes are ignored. A name with no slash has an
/// empty project: `"library/ubuntu"` gives `("library", "ubuntu")`,
/// `"a/b/c"` gives `("a", "b/c")` and `"ubuntu"` gives `("", "ubuntu")`.
pub fn parse_repository(name: &str) -> (&str, &str) {
    let trimmed = name.trim_matches('/');
    match trimmed.split_once('/') {
        Some((project, rest)) => (project, rest),
        None => ("", trimmed),
    }
}

/// Project component of a repository path, if there is one.
pub fn project_of(name: &str) -> Option<&str> {
    match parse_repository(name) {
        ("", _) => None,
        (project, _) => Some(project),
    }
}
