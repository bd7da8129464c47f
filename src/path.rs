//! Container path helpers for chapter-relative references.

use smallvec::SmallVec;

/// Collapse `.`, `..`, and empty segments. `..` above the root is dropped.
pub fn normalize_path(path: &str) -> String {
    let mut parts: SmallVec<[&str; 8]> = SmallVec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// Directory of `path` including the trailing `/`, or empty at the root.
pub fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(slash) => &path[..=slash],
        None => "",
    }
}

/// Drop any `?query` and `#fragment` suffix.
pub fn strip_query_and_fragment(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Case-insensitive extension check; `exts` carry their leading dot.
pub fn has_any_extension(path: &str, exts: &[&str]) -> bool {
    exts.iter().any(|ext| {
        path.len() >= ext.len()
            && path.as_bytes()[path.len() - ext.len()..].eq_ignore_ascii_case(ext.as_bytes())
    })
}

/// Join a `/`-separated directory and file name.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
