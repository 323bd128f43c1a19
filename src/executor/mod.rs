//! Cleanup Executor: the per-candidate loop that ties the Validator,
//! Deleter, Audit Store, Metrics, and CPU Limiter together (spec §4.5).

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::audit::{AuditStore, DeletionRecord, RecordAction};
use crate::core::errors::SsError;
use crate::deleter::{Deleter, ObjectType};
use crate::limiter::{CpuLimiter, ThrottleOutcome};
use crate::logger::sink::LogSink;
use crate::metrics::Metrics;
use crate::probe::DiskProbe;
use crate::scanner::{Candidate, Strategy};
use crate::validator::{AllowedRoots, ProtectedSet, RejectReason, validate_delete_target};

/// How often (in successful deletes) a `DISK`-strategy cycle re-checks free
/// percent against the target (spec §4.5 step 7).
const DISK_RECHECK_INTERVAL: u64 = 32;

/// Outcome of running one root's candidate sequence through the Executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub errors: u64,
    pub skipped: u64,
    pub aborted: bool,
}

/// Ties together the capability handles the Executor needs. None of these
/// are process-wide singletons; they're passed in per cycle (spec §9).
pub struct CleanupExecutor<'a> {
    pub deleter: &'a dyn Deleter,
    pub audit: &'a AuditStore,
    pub log: &'a Mutex<LogSink>,
    pub metrics: &'a Metrics,
    pub limiter: &'a CpuLimiter,
    pub allowed_roots: &'a AllowedRoots,
    pub protected: &'a ProtectedSet,
}

impl CleanupExecutor<'_> {
    /// Run every candidate through the seven-step loop. For `DISK` strategy,
    /// stops early once `disk_probe` reports free percent at or above
    /// `target_free_percent` on `mount_path`.
    pub fn run(
        &self,
        candidates: Vec<Candidate>,
        strategy: Strategy,
        mount_path: &Path,
        target_free_percent: f64,
        disk_probe: &DiskProbe,
        mode_label: &str,
    ) -> CycleStats {
        let mut stats = CycleStats::default();
        let mut deletes_since_check: u64 = 0;

        for candidate in candidates {
            match self.limiter.throttle() {
                ThrottleOutcome::Cancelled => {
                    self.record(&mut stats, &candidate, RecordAction::Skip, 0, Some("limiter_cancelled"), None, mode_label);
                    stats.aborted = true;
                    break;
                }
                ThrottleOutcome::Continued => {}
            }

            if let Some(skip_reason) = candidate.synthetic_skip {
                self.record(&mut stats, &candidate, RecordAction::Skip, 0, Some(skip_reason), None, mode_label);
                continue;
            }

            let meta = match fs::symlink_metadata(&candidate.path) {
                Ok(meta) => meta,
                Err(_) => {
                    self.record(&mut stats, &candidate, RecordAction::Skip, 0, Some("not_found"), None, mode_label);
                    continue;
                }
            };
            let object_type = ObjectType::from_metadata(&meta);
            let size_hint = meta.len();

            if let Err(reason) = validate_delete_target(&candidate.path, self.allowed_roots, self.protected) {
                if reason.is_safety_incident() {
                    self.metrics.safety_incidents.fetch_add(1, Ordering::Relaxed);
                }
                self.record(
                    &mut stats,
                    &candidate,
                    RecordAction::Skip,
                    0,
                    Some(reason.as_secondary_reason()),
                    None,
                    mode_label,
                );
                continue;
            }

            if !self.deleter.is_real() {
                self.record(&mut stats, &candidate, RecordAction::DryRun, size_hint, None, None, mode_label);
                continue;
            }

            match self.deleter.delete(&candidate.path, root_recursive(&candidate), size_hint, object_type) {
                Ok(outcome) => {
                    stats.files_deleted += 1;
                    stats.bytes_freed += outcome.bytes_removed;
                    self.metrics.files_deleted.fetch_add(1, Ordering::Relaxed);
                    self.metrics.bytes_freed.fetch_add(outcome.bytes_removed, Ordering::Relaxed);
                    self.record(&mut stats, &candidate, RecordAction::Delete, outcome.bytes_removed, None, None, mode_label);
                    deletes_since_check += 1;
                }
                Err(err) => self.record_delete_error(&mut stats, &candidate, &err, mode_label),
            }

            if strategy == Strategy::Disk && deletes_since_check >= DISK_RECHECK_INTERVAL {
                deletes_since_check = 0;
                if let Ok(free_pct) = disk_probe.free_percent(mount_path) {
                    if free_pct >= target_free_percent {
                        break;
                    }
                }
            }
        }

        stats
    }

    fn record_delete_error(&self, stats: &mut CycleStats, candidate: &Candidate, err: &SsError, mode_label: &str) {
        match err {
            SsError::NotFound { .. } => {
                self.record(stats, candidate, RecordAction::Skip, 0, Some("stale_nfs"), None, mode_label);
            }
            SsError::PermissionDenied { .. } => {
                self.record(
                    stats,
                    candidate,
                    RecordAction::Error,
                    0,
                    Some("permission_denied"),
                    Some(err.to_string()),
                    mode_label,
                );
            }
            other => {
                self.record(stats, candidate, RecordAction::Error, 0, Some(other.code()), Some(other.to_string()), mode_label);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        stats: &mut CycleStats,
        candidate: &Candidate,
        action: RecordAction,
        size: u64,
        secondary_reason: Option<&str>,
        error_message: Option<String>,
        mode_label: &str,
    ) {
        match action {
            RecordAction::Skip => stats.skipped += 1,
            RecordAction::Error => stats.errors += 1,
            RecordAction::Delete | RecordAction::DryRun => {}
        }

        let object_name = candidate
            .path
            .file_name()
            .map_or_else(|| candidate.path.to_string_lossy().to_string(), |n| n.to_string_lossy().to_string());

        let record = DeletionRecord {
            id: 0,
            timestamp: chrono::Utc::now(),
            action,
            path: candidate.path.clone(),
            object_name,
            object_type: candidate.object_type.as_str().to_string(),
            size,
            primary_reason: candidate.primary_reason.as_str().to_string(),
            secondary_reason: secondary_reason.map(str::to_string),
            mode: mode_label.to_string(),
            error_message,
        };

        if let Err(err) = self.audit.append(&record) {
            self.metrics.audit_write_errors.fetch_add(1, Ordering::Relaxed);
            eprintln!(
                "[STORAGE-SAGE] audit append failed for {}: {err}",
                record.path.display()
            );
        }

        self.log.lock().log_record(&record);
    }
}

const fn root_recursive(_candidate: &Candidate) -> bool {
    // Directory candidates are only emitted by the scanner when the root is
    // recursive+delete_dirs-eligible; a non-empty subtree removal always
    // wants `recursive = true` here (the scanner does not emit directories
    // for non-recursive roots at all).
    true
}

/// Lock-free counters the Executor increments directly, distinct from the
/// audit-store-backed per-record history.
#[derive(Debug, Default)]
pub struct ExecutorCounters {
    pub files_deleted: AtomicU64,
    pub bytes_freed: AtomicU64,
}
