//! Slash-separated tree paths.

use crate::error::RemoteError;

const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// Split a path into validated segments. Leading and trailing slashes are
/// ignored; the empty path addresses the root.
pub fn segments(path: &str) -> Result<Vec<String>, RemoteError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|seg| {
            if seg.is_empty() || seg.contains(FORBIDDEN) {
                Err(RemoteError::InvalidPath(path.to_string()))
            } else {
                Ok(seg.to_string())
            }
        })
        .collect()
}

/// Join path fragments with `/`.
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Two paths are related when one is an ancestor of (or equal to) the other.
pub fn related(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}
