//! Scanner: lazily walks a single root under a chosen strategy, producing a
//! sequence of deletion candidates (spec §4.4). Never materializes a whole
//! tree in memory; a single directory's entries are the largest buffer held
//! at once.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::config::Root;
use crate::core::errors::{Result, SsError};
use crate::deleter::ObjectType;

/// Why a candidate was selected (mirrors the cycle's active strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryReason {
    Age,
    Disk,
    Stack,
}

impl PrimaryReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Age => "AGE",
            Self::Disk => "DISK",
            Self::Stack => "STACK",
        }
    }
}

/// The strategy chosen for a root in the current tick (spec §4.10 decision table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Age,
    Disk,
    Stack,
}

impl Strategy {
    const fn primary_reason(self) -> PrimaryReason {
        match self {
            Self::Age => PrimaryReason::Age,
            Self::Disk => PrimaryReason::Disk,
            Self::Stack => PrimaryReason::Stack,
        }
    }
}

/// A file or directory entry considered for deletion in one cycle.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
    pub age_days: u32,
    pub object_type: ObjectType,
    pub primary_reason: PrimaryReason,
    /// Set when the Scanner itself could not stat/read this entry; the
    /// Executor must record this as a skip without re-stating or validating
    /// it (spec §4.5 step 3).
    pub synthetic_skip: Option<&'static str>,
}

const DISK_MODE_MIN_AGE_SECS: u64 = 24 * 60 * 60;

/// Walk `root` under `strategy`, yielding candidates.
///
/// `now` is injected so callers (and tests) control age computation
/// deterministically rather than relying on wall-clock time mid-walk.
///
/// # Errors
///
/// Returns an error only for a whole-root catastrophic failure (the root
/// itself cannot be read at all). Per-entry failures become synthetic skip
/// candidates instead of propagating.
pub fn scan(root: &Root, strategy: Strategy, now: SystemTime) -> Result<Vec<Candidate>> {
    let threshold_days = match strategy {
        Strategy::Age | Strategy::Disk => root.age_off_days,
        Strategy::Stack => root.stack_age_days,
    };
    let reason = strategy.primary_reason();

    let mut candidates = Vec::new();
    walk_dir(
        &root.path,
        root.recursive,
        root.delete_dirs,
        now,
        &mut candidates,
        reason,
        threshold_days,
    )?;

    if strategy == Strategy::Disk {
        candidates.retain(|c| {
            c.synthetic_skip.is_some()
                || now
                    .duration_since(c.modified)
                    .is_ok_and(|age| age.as_secs() >= DISK_MODE_MIN_AGE_SECS)
        });
        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    }

    Ok(candidates)
}

fn walk_dir(
    dir: &Path,
    recursive: bool,
    delete_dirs: bool,
    now: SystemTime,
    out: &mut Vec<Candidate>,
    reason: PrimaryReason,
    threshold_days: u32,
) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|source| SsError::io(dir, source))?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                out.push(synthetic_skip_candidate(dir.to_path_buf(), reason, "permission_denied"));
                continue;
            }
        };
        let path = entry.path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(_) => {
                out.push(synthetic_skip_candidate(path, reason, "not_found"));
                continue;
            }
        };

        if meta.is_dir() && !meta.is_symlink() {
            if recursive {
                // Depth-first recursion: at most one directory's worth of
                // siblings is pending at a time, bounding memory use.
                walk_dir(&path, recursive, delete_dirs, now, out, reason, threshold_days)?;
            }
            if delete_dirs {
                push_if_qualifying(out, &path, &meta, now, reason, threshold_days);
            }
            continue;
        }

        push_if_qualifying(out, &path, &meta, now, reason, threshold_days);
    }

    Ok(())
}

fn push_if_qualifying(
    out: &mut Vec<Candidate>,
    path: &Path,
    meta: &fs::Metadata,
    now: SystemTime,
    reason: PrimaryReason,
    threshold_days: u32,
) {
    let modified = meta.modified().unwrap_or(now);
    let age_days = age_in_days(now, modified);
    if age_days < threshold_days {
        return;
    }
    out.push(Candidate {
        path: path.to_path_buf(),
        size_bytes: meta.len(),
        modified,
        age_days,
        object_type: ObjectType::from_metadata(meta),
        primary_reason: reason,
        synthetic_skip: None,
    });
}

fn age_in_days(now: SystemTime, modified: SystemTime) -> u32 {
    now.duration_since(modified)
        .map_or(0, |d| u32::try_from(d.as_secs() / 86_400).unwrap_or(u32::MAX))
}

fn synthetic_skip_candidate(path: PathBuf, reason: PrimaryReason, skip_reason: &'static str) -> Candidate {
    Candidate {
        path,
        size_bytes: 0,
        modified: SystemTime::UNIX_EPOCH,
        age_days: 0,
        object_type: ObjectType::File,
        primary_reason: reason,
        synthetic_skip: Some(skip_reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_root(path: PathBuf) -> Root {
        Root {
            path,
            age_off_days: 30,
            min_free_percent: 20.0,
            max_free_percent: 30.0,
            target_free_percent: 25.0,
            priority: 0,
            stack_threshold_percent: 95.0,
            stack_age_days: 7,
            recursive: true,
            delete_dirs: false,
        }
    }

    fn set_mtime_days_ago(path: &Path, days: u64) {
        let mtime = filetime::FileTime::from_system_time(SystemTime::now() - Duration::from_secs(days * 86_400));
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    #[test]
    fn age_strategy_emits_only_old_enough_entries() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.log");
        let fresh = dir.path().join("fresh.log");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&fresh, b"x").unwrap();
        set_mtime_days_ago(&old, 40);
        set_mtime_days_ago(&fresh, 1);

        let root = make_root(dir.path().to_path_buf());
        let candidates = scan(&root, Strategy::Age, SystemTime::now()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, old);
    }

    #[test]
    fn disk_strategy_sorts_ascending_by_mtime_then_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"x").unwrap();
        let same = filetime::FileTime::from_system_time(SystemTime::now() - Duration::from_secs(5 * 86_400));
        filetime::set_file_mtime(&a, same).unwrap();
        filetime::set_file_mtime(&b, same).unwrap();

        let root = make_root(dir.path().to_path_buf());
        let candidates = scan(&root, Strategy::Disk, SystemTime::now()).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].path, a);
        assert_eq!(candidates[1].path, b);
    }

    #[test]
    fn disk_strategy_excludes_entries_younger_than_one_day_floor() {
        let dir = tempfile::tempdir().unwrap();
        let brand_new = dir.path().join("brand_new.log");
        std::fs::write(&brand_new, b"x").unwrap();

        let root = make_root(dir.path().to_path_buf());
        let candidates = scan(&root, Strategy::Disk, SystemTime::now()).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn stack_strategy_uses_stack_age_days_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let medium = dir.path().join("medium.log");
        std::fs::write(&medium, b"x").unwrap();
        set_mtime_days_ago(&medium, 8);

        let mut root = make_root(dir.path().to_path_buf());
        root.age_off_days = 30;
        root.stack_age_days = 7;

        let age_candidates = scan(&root, Strategy::Age, SystemTime::now()).unwrap();
        assert!(age_candidates.is_empty());
        let stack_candidates = scan(&root, Strategy::Stack, SystemTime::now()).unwrap();
        assert_eq!(stack_candidates.len(), 1);
    }

    #[test]
    fn directories_are_only_candidates_when_delete_dirs_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        set_mtime_days_ago(&sub, 40);

        let mut root = make_root(dir.path().to_path_buf());
        root.delete_dirs = false;
        let candidates = scan(&root, Strategy::Age, SystemTime::now()).unwrap();
        assert!(candidates.is_empty());

        root.delete_dirs = true;
        let candidates = scan(&root, Strategy::Age, SystemTime::now()).unwrap();
        assert!(candidates.iter().any(|c| c.path == sub));
    }

    #[test]
    fn non_recursive_root_does_not_descend_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        let nested = sub.join("nested.log");
        std::fs::write(&nested, b"x").unwrap();
        set_mtime_days_ago(&nested, 40);

        let mut root = make_root(dir.path().to_path_buf());
        root.recursive = false;
        let candidates = scan(&root, Strategy::Age, SystemTime::now()).unwrap();
        assert!(!candidates.iter().any(|c| c.path == nested));
    }
}
