//! Conversions between dotted metric names and tree-relative filesystem paths.

use std::path::{Path, PathBuf};

/// `a.b.c` -> `<root>/a/b/c`
pub(crate) fn filesystem_path(root: &Path, node_path: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in node_path.split('.') {
        path.push(segment);
    }
    path
}

/// `<root>/a/b/c` -> `a.b.c`. `fs_path` must be `root` or a descendant of it.
pub(crate) fn node_path(root: &Path, fs_path: &Path) -> Option<String> {
    let rel = fs_path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            std::path::Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let root = Path::new("/tmp/tree");
        let fs = filesystem_path(root, "a.b.c");
        assert_eq!(fs, PathBuf::from("/tmp/tree/a/b/c"));
        assert_eq!(node_path(root, &fs).as_deref(), Some("a.b.c"));
    }

    #[test]
    fn rejects_paths_outside_root() {
        let root = Path::new("/tmp/tree");
        assert_eq!(node_path(root, Path::new("/tmp/other/a")), None);
    }
}
