//! Path helpers for configured locations.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~` (or when no home directory is known) are
/// returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Resolve a configured path: expand `~`, then anchor relative paths at `root`.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

/// Relative path that cannot climb out of the directory it is joined to
/// (lexically, no symlink resolution).
pub fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_unchanged() {
        let p = resolve(Path::new("/root"), Path::new("/abs/cache"));
        assert_eq!(p, PathBuf::from("/abs/cache"));
    }

    #[test]
    fn test_resolve_relative_joins_root() {
        let p = resolve(Path::new("/proj"), Path::new(".memo/cache"));
        assert_eq!(p, PathBuf::from("/proj/.memo/cache"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.memo"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".memo"));
        }
        assert_eq!(expand_tilde(Path::new("plain")), PathBuf::from("plain"));
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained(Path::new("out/a.txt")));
        assert!(is_contained(Path::new("./a.txt")));
        assert!(!is_contained(Path::new("../a.txt")));
        assert!(!is_contained(Path::new("out/../../a.txt")));
        assert!(!is_contained(Path::new("/proj/a.txt")));
        assert!(!is_contained(Path::new("")));
    }
}
