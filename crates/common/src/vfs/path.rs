//! Path helpers shared by the index and the FUSE layer
//!
//! All filesystem paths are absolute, `/`-separated, with no trailing slash
//! (except the root itself).

/// Normalize a path: leading `/`, no trailing `/`, root is `/`.
pub fn normalize(path: &str) -> String {
    let path = path.trim();

    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

/// Parent of a path. The root is its own parent.
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => normalized[..pos].to_string(),
    }
}

/// Last component of a path, empty for the root.
pub fn filename(path: &str) -> &str {
    let trimmed = path.trim().trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Append a child component to a directory path.
pub fn join(dir: &str, name: &str) -> String {
    let dir = normalize(dir);
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// A single path component that can be placed in the tree.
pub fn is_valid_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("movies"), "/movies");
        assert_eq!(normalize("/movies/"), "/movies");
        assert_eq!(normalize("/movies/Foo//"), "/movies/Foo");
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/"), "/");
        assert_eq!(parent("/movies"), "/");
        assert_eq!(parent("/series/Show/Season 01"), "/series/Show");
    }

    #[test]
    fn test_filename_and_join() {
        assert_eq!(filename("/"), "");
        assert_eq!(filename("/movies/Foo (2024)"), "Foo (2024)");
        assert_eq!(join("/", "movies"), "/movies");
        assert_eq!(join("/movies/", "Foo"), "/movies/Foo");
    }

    #[test]
    fn test_component_validation() {
        assert!(is_valid_component("Foo (2024).mkv"));
        assert!(!is_valid_component(""));
        assert!(!is_valid_component(".."));
        assert!(!is_valid_component("a/b"));
    }
}
