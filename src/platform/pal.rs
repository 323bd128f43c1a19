//! Platform abstraction layer: `statvfs`/mount-table access behind a small
//! trait so the Disk Probe can be exercised against a [`MockPlatform`] in
//! tests without touching real disks (spec §9, "dynamic dispatch over
//! filesystem operations").

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SsError};

/// Filesystem statistics for a path/mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
    pub is_readonly: bool,
}

impl FsStats {
    #[must_use]
    pub fn free_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.available_bytes as f64 * 100.0) / self.total_bytes as f64
        }
    }
}

/// Mount-point metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

/// OS abstraction used by the Disk Probe.
pub trait Platform: Send + Sync {
    /// Single low-cost statfs-equivalent syscall for the mount containing `path`.
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    /// Current mount table, longest-prefix-first.
    fn mount_points(&self) -> Result<Vec<MountPoint>>;
    /// A benign, possibly-blocking probe used by stale-mount detection
    /// (e.g. `stat` on the root). Runs on a caller-provided worker thread.
    fn probe(&self, path: &Path) -> Result<()>;
}

/// Linux platform implementation using `/proc/self/mounts` + `statvfs`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mounts = self.mount_points()?;
        let mount = find_mount(path, &mounts).ok_or_else(|| SsError::Internal {
            details: format!("could not map {} to a mount point", path.display()),
        })?;
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| SsError::Internal {
            details: format!("statvfs({}) failed: {error}", path.display()),
        })?;
        let fragment = stat.fragment_size();
        Ok(FsStats {
            total_bytes: stat.blocks().saturating_mul(fragment),
            free_bytes: stat.blocks_free().saturating_mul(fragment),
            available_bytes: stat.blocks_available().saturating_mul(fragment),
            fs_type: mount.fs_type.clone(),
            mount_point: mount.path.clone(),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        let raw = fs::read_to_string("/proc/self/mounts").map_err(|source| SsError::IoError {
            path: PathBuf::from("/proc/self/mounts"),
            source,
        })?;
        parse_proc_mounts(&raw)
    }

    fn probe(&self, path: &Path) -> Result<()> {
        fs::symlink_metadata(path).map(|_| ()).map_err(|source| SsError::io(path, source))
    }
}

/// In-memory mock implementation for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    mounts: Vec<MountPoint>,
    stats_by_mount: HashMap<PathBuf, FsStats>,
    /// Paths whose `probe` call should hang forever (simulating a stale NFS
    /// mount) by returning a sentinel error instead of blocking — tests
    /// drive the timeout behavior at the `DiskProbe` layer instead of
    /// literally sleeping.
    unresponsive: Vec<PathBuf>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(mounts: Vec<MountPoint>, stats_by_mount: HashMap<PathBuf, FsStats>) -> Self {
        Self {
            mounts,
            stats_by_mount,
            unresponsive: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_unresponsive(mut self, path: PathBuf) -> Self {
        self.unresponsive.push(path);
        self
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mount = find_mount(path, &self.mounts).ok_or_else(|| SsError::Internal {
            details: "mock mount not found".to_string(),
        })?;
        self.stats_by_mount
            .get(&mount.path)
            .cloned()
            .ok_or_else(|| SsError::Internal {
                details: "mock stats not found".to_string(),
            })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        Ok(self.mounts.clone())
    }

    fn probe(&self, path: &Path) -> Result<()> {
        if self.unresponsive.iter().any(|p| path.starts_with(p)) {
            // The probe is simulated as perpetually blocked; the caller's
            // timeout mechanism is what must bound this, not this mock.
            std::thread::sleep(std::time::Duration::from_secs(3600));
        }
        Ok(())
    }
}

/// Detect the active platform implementation.
///
/// # Errors
///
/// Returns [`SsError::Internal`] on unsupported platforms.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(SsError::Internal {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

fn parse_proc_mounts(raw: &str) -> Result<Vec<MountPoint>> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(SsError::Internal {
                details: format!("invalid /proc/self/mounts line: {line}"),
            });
        }
        let mount_path = unescape_mount_field(fields[1]);
        mounts.push(MountPoint {
            path: PathBuf::from(mount_path),
            device: fields[0].to_string(),
            fs_type: fields[2].to_string(),
        });
    }
    mounts.sort_by(|left, right| right.path.as_os_str().len().cmp(&left.path.as_os_str().len()));
    Ok(mounts)
}

fn find_mount<'a>(path: &Path, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.path))
        .max_by_key(|mount| mount.path.as_os_str().len())
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel in
/// `/proc/mounts` and `/etc/mtab` for special characters in paths.
fn unescape_mount_field(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let a = bytes[i + 1];
            let b = bytes[i + 2];
            let c = bytes[i + 3];
            if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() {
                let val = (a - b'0') * 64 + (b - b'0') * 8 + (c - b'0');
                result.push(char::from(val));
                i += 4;
                continue;
            }
        }
        result.push(char::from(bytes[i]));
        i += 1;
    }
    result
}
