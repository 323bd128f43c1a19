//! Shared path manipulation utilities.
//!
//! Two distinct resolution modes are used by the safety validator (see
//! `validator`): a pure lexical clean with no filesystem access (steps 1-2 of
//! the validation algorithm must run before any symlink is touched), and a
//! canonicalizing resolution that follows symlinks (step 5).

use std::env;
use std::path::{Component, Path, PathBuf};

/// Make `path` absolute relative to the current working directory, without
/// touching the filesystem.
#[must_use]
pub fn make_absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    }
}

/// Lexically clean an absolute path: collapse `.` and repeated separators,
/// and resolve `..` against preceding normal components.
///
/// Unlike a typical "normalize" helper, a leading `..` that has nothing left
/// to pop (i.e. one that would climb above the filesystem root) is
/// deliberately *preserved* as a literal component in the output rather than
/// silently dropped. This lets the caller detect an attempted traversal by
/// checking whether the cleaned path still contains a `ParentDir` component.
#[must_use]
pub fn lexically_clean(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Whether `path`'s components contain a literal, unresolved `..`.
#[must_use]
pub fn contains_parent_dir_component(path: &Path) -> bool {
    path.components().any(|c| c == Component::ParentDir)
}

/// Resolve a path to an absolute, normalized path, following symlinks where
/// possible.
///
/// If `fs::canonicalize` succeeds (the path exists), it is used to resolve
/// symlinks and normalize components. If it fails (e.g. the path does not
/// exist), the path is made absolute relative to CWD and lexically cleaned.
#[must_use]
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = make_absolute(path);

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    lexically_clean(&absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn lexically_clean_collapses_dot_and_double_separators() {
        let input = Path::new("/a/./b//c/");
        let cleaned = lexically_clean(input);
        assert_eq!(cleaned, Path::new("/a/b/c"));
    }

    #[test]
    fn lexically_clean_resolves_parent_within_bounds() {
        let input = Path::new("/a/b/../c");
        let cleaned = lexically_clean(input);
        assert_eq!(cleaned, Path::new("/a/c"));
    }

    #[test]
    fn lexically_clean_preserves_unresolvable_parent() {
        let input = Path::new("/../etc/passwd");
        let cleaned = lexically_clean(input);
        assert!(contains_parent_dir_component(&cleaned));
    }

    #[test]
    fn lexically_clean_detects_escape_past_root_through_nested_root() {
        // A crafted path joined under an allowed root that climbs above it
        // and then above the filesystem root entirely.
        let input = Path::new("/data/root/../../../etc/passwd");
        let cleaned = lexically_clean(input);
        assert!(contains_parent_dir_component(&cleaned));
    }

    #[test]
    fn well_formed_path_has_no_parent_dir_after_clean() {
        let input = Path::new("/data/root/subdir/../file.log");
        let cleaned = lexically_clean(input);
        assert!(!contains_parent_dir_component(&cleaned));
        assert_eq!(cleaned, Path::new("/data/root/file.log"));
    }
}
