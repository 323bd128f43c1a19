//! Disk Probe: free-space percentage and stale-mount detection (spec §4.3).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::core::errors::{Result, SsError};
use crate::platform::pal::Platform;

/// Free-space percentage and stale-mount probing for a single root.
pub struct DiskProbe {
    platform: Arc<dyn Platform>,
}

impl DiskProbe {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Percentage of free space on the filesystem containing `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the single underlying `statvfs`-equivalent call
    /// fails.
    pub fn free_percent(&self, path: &Path) -> Result<f64> {
        let stats = self.platform.fs_stats(path)?;
        Ok(stats.free_pct())
    }

    /// Attempt a benign probe (e.g. `stat` on the root) on a background
    /// worker with a deadline. If the probe does not return within
    /// `timeout`, the mount is treated as stale and `true` is returned. The
    /// worker keeps running to completion in the background; its eventual
    /// result is discarded. A stale result never blocks the caller beyond
    /// `timeout`.
    #[must_use]
    pub fn is_stale_mount(&self, path: &Path, timeout: Duration) -> bool {
        let (tx, rx) = mpsc::channel();
        let platform = Arc::clone(&self.platform);
        let probe_path = path.to_path_buf();

        // Detached: if the probe never returns (a genuinely stuck NFS
        // handle), this thread leaks until the kernel eventually unblocks
        // it. That's an acceptable tradeoff against blocking the cycle.
        let _ = thread::Builder::new()
            .name("ss-stale-mount-probe".to_string())
            .spawn(move || {
                let _ = tx.send(platform.probe(&probe_path));
            });

        rx.recv_timeout(timeout).is_err()
    }
}

/// Convenience wrapper pairing a timeout with [`DiskProbe::is_stale_mount`]
/// that returns a typed error instead of a bare bool, for call sites that
/// want to propagate `?`.
pub fn require_responsive_mount(probe: &DiskProbe, path: &Path, timeout: Duration) -> Result<()> {
    if probe.is_stale_mount(path, timeout) {
        return Err(SsError::StaleMount {
            path: path.to_path_buf(),
            timeout_secs: timeout.as_secs(),
        });
    }
    Ok(())
}
