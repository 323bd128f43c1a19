//! Deleter: a narrow capability interface over filesystem removal, with
//! `real` and `dry-run` variants selectable once at daemon start (spec
//! §4.2). The Cleanup Executor never performs deletion outside this
//! interface.

use std::fs;
use std::path::Path;

use crate::core::errors::{Result, SsError};

/// The kind of filesystem object a [`Deleter`] acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Directory,
    Symlink,
}

impl ObjectType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        }
    }

    /// Classify from already-collected metadata, without another syscall.
    #[must_use]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        if meta.is_symlink() {
            Self::Symlink
        } else if meta.is_dir() {
            Self::Directory
        } else {
            Self::File
        }
    }
}

/// Result of a (real or simulated) deletion.
#[derive(Debug, Clone, Copy)]
pub struct DeleteOutcome {
    pub bytes_removed: u64,
    pub object_type: ObjectType,
}

/// Capability interface over filesystem removal. The Executor calls this
/// once per candidate after validation succeeds.
pub trait Deleter: Send + Sync {
    /// Delete (or simulate deleting) `path`. `size_hint`/`type_hint` come
    /// from the single stat the Executor already performed (spec §4.2: "the
    /// size sampled before removal, passed in").
    ///
    /// # Errors
    ///
    /// Returns an [`SsError`] classified as `PermissionDenied`, `NotFound`,
    /// or `IoError` depending on the underlying failure.
    fn delete(&self, path: &Path, recursive: bool, size_hint: u64, type_hint: ObjectType) -> Result<DeleteOutcome>;

    /// Whether this deleter actually touches the filesystem. Used by tests
    /// asserting dry-run non-destructiveness (spec §8 property 2).
    fn is_real(&self) -> bool;
}

/// Performs real filesystem removal.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealDeleter;

impl Deleter for RealDeleter {
    fn delete(&self, path: &Path, recursive: bool, size_hint: u64, type_hint: ObjectType) -> Result<DeleteOutcome> {
        let result = match type_hint {
            ObjectType::File | ObjectType::Symlink => fs::remove_file(path),
            ObjectType::Directory => {
                if recursive {
                    fs::remove_dir_all(path)
                } else {
                    fs::remove_dir(path)
                }
            }
        };

        result.map_err(|source| classify_io_error(path, source))?;

        Ok(DeleteOutcome {
            bytes_removed: size_hint,
            object_type: type_hint,
        })
    }

    fn is_real(&self) -> bool {
        true
    }
}

/// Never touches the filesystem; returns the would-be-removed bytes/type
/// from the caller-provided stat. Used when the daemon is started with
/// `--dry-run`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDeleter;

impl Deleter for DryRunDeleter {
    fn delete(&self, _path: &Path, _recursive: bool, size_hint: u64, type_hint: ObjectType) -> Result<DeleteOutcome> {
        Ok(DeleteOutcome {
            bytes_removed: size_hint,
            object_type: type_hint,
        })
    }

    fn is_real(&self) -> bool {
        false
    }
}

fn classify_io_error(path: &Path, source: std::io::Error) -> SsError {
    match source.kind() {
        std::io::ErrorKind::PermissionDenied => SsError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => SsError::NotFound {
            path: path.to_path_buf(),
        },
        _ => SsError::io(path, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dry_run_never_touches_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("victim.txt");
        std::fs::write(&file, b"still here").unwrap();

        let deleter = DryRunDeleter;
        let outcome = deleter
            .delete(&file, false, 10, ObjectType::File)
            .expect("dry run never fails");
        assert_eq!(outcome.bytes_removed, 10);
        assert!(file.exists(), "dry-run must not remove the file");
        assert!(!deleter.is_real());
    }

    #[test]
    fn real_deleter_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("victim.txt");
        std::fs::write(&file, b"gone soon").unwrap();

        let deleter = RealDeleter;
        let outcome = deleter
            .delete(&file, false, 9, ObjectType::File)
            .expect("delete should succeed");
        assert_eq!(outcome.bytes_removed, 9);
        assert!(!file.exists());
        assert!(deleter.is_real());
    }

    #[test]
    fn real_deleter_removes_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(sub.join("nested")).unwrap();
        std::fs::write(sub.join("nested").join("f.txt"), b"x").unwrap();

        let deleter = RealDeleter;
        deleter
            .delete(&sub, true, 0, ObjectType::Directory)
            .expect("recursive delete should succeed");
        assert!(!sub.exists());
    }

    #[test]
    fn real_deleter_refuses_nonempty_dir_without_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("f.txt"), b"x").unwrap();

        let deleter = RealDeleter;
        let err = deleter
            .delete(&sub, false, 0, ObjectType::Directory)
            .expect_err("non-recursive delete of nonempty dir should fail");
        assert!(sub.exists());
        drop(err);
    }

    struct RecordingDeleter {
        calls: AtomicUsize,
        inner: RealDeleter,
    }

    impl Deleter for RecordingDeleter {
        fn delete(&self, path: &Path, recursive: bool, size_hint: u64, type_hint: ObjectType) -> Result<DeleteOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(path, recursive, size_hint, type_hint)
        }

        fn is_real(&self) -> bool {
            true
        }
    }

    #[test]
    fn dry_run_deleter_is_offered_every_path_but_never_deletes() {
        // Property from spec §4.2/§8: every path ever offered must be
        // offered to the real deleter zero times while dry-run is active.
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<_> = (0..5)
            .map(|i| {
                let p = dir.path().join(format!("f{i}.txt"));
                std::fs::write(&p, b"data").unwrap();
                p
            })
            .collect();

        let recording = RecordingDeleter {
            calls: AtomicUsize::new(0),
            inner: RealDeleter,
        };
        let dry_run = DryRunDeleter;

        for f in &files {
            dry_run.delete(f, false, 4, ObjectType::File).unwrap();
        }
        assert_eq!(recording.calls.load(Ordering::SeqCst), 0);
        for f in &files {
            assert!(f.exists());
        }
    }
}
