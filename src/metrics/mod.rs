//! Metrics & Health: Prometheus exposition and an HTTP surface for
//! `/metrics` and `/health` (spec §4.7).

pub mod health;
pub mod server;

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Process-wide counters and gauges, plus the [`Registry`] they're
/// registered against for `/metrics` exposition.
pub struct Metrics {
    pub registry: Registry,

    pub files_deleted: AtomicU64,
    pub bytes_freed: AtomicU64,
    pub total_errors: AtomicU64,
    pub safety_incidents: AtomicU64,
    pub audit_write_errors: AtomicU64,

    per_path_bytes_deleted: IntCounterVec,
    daemon_restarts: IntCounterVec,
    root_free_percent: IntGaugeVec,
    last_cleanup_timestamp: IntGaugeVec,
    last_cleanup_mode: IntGaugeVec,
    daemon_healthy: AtomicI64,
    component_healthy: IntGaugeVec,

    cleanup_cycle_duration: Histogram,
    health_check_duration: Histogram,

    /// Guards registry mutation so `/metrics` scrapes and cycle updates
    /// never race on first-touch label registration.
    label_lock: Mutex<()>,
}

impl Metrics {
    /// Build a fresh, empty registry with all metric families declared.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        let registry = Registry::new();

        let per_path_bytes_deleted = IntCounterVec::new(
            Opts::new("storage_sage_bytes_deleted_total", "Bytes deleted, labeled by root path"),
            &["root"],
        )
        .expect("metric opts are static and valid");
        let daemon_restarts = IntCounterVec::new(
            Opts::new("storage_sage_daemon_restarts_total", "Daemon restarts, labeled by reason"),
            &["reason"],
        )
        .expect("metric opts are static and valid");
        let root_free_percent = IntGaugeVec::new(
            Opts::new("storage_sage_root_free_percent", "Free space percent, labeled by root path"),
            &["root"],
        )
        .expect("metric opts are static and valid");
        let last_cleanup_timestamp = IntGaugeVec::new(
            Opts::new("storage_sage_last_cleanup_timestamp_seconds", "Unix timestamp of the last cleanup, labeled by root"),
            &["root"],
        )
        .expect("metric opts are static and valid");
        let last_cleanup_mode = IntGaugeVec::new(
            Opts::new("storage_sage_last_cleanup_mode", "1 for the active strategy, labeled by root and mode"),
            &["root", "mode"],
        )
        .expect("metric opts are static and valid");
        let component_healthy = IntGaugeVec::new(
            Opts::new("storage_sage_component_healthy", "1 if healthy, labeled by component"),
            &["component"],
        )
        .expect("metric opts are static and valid");
        let cleanup_cycle_duration = Histogram::with_opts(HistogramOpts::new(
            "storage_sage_cleanup_cycle_duration_seconds",
            "Wall-clock duration of a full cleanup cycle",
        ))
        .expect("histogram opts are static and valid");
        let health_check_duration = Histogram::with_opts(HistogramOpts::new(
            "storage_sage_health_check_duration_seconds",
            "Wall-clock duration of a health probe pass",
        ))
        .expect("histogram opts are static and valid");

        for collector in [
            Box::new(per_path_bytes_deleted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(daemon_restarts.clone()),
            Box::new(root_free_percent.clone()),
            Box::new(last_cleanup_timestamp.clone()),
            Box::new(last_cleanup_mode.clone()),
            Box::new(component_healthy.clone()),
            Box::new(cleanup_cycle_duration.clone()),
            Box::new(health_check_duration.clone()),
        ] {
            registry.register(collector).expect("collector names are unique");
        }

        Self {
            registry,
            files_deleted: AtomicU64::new(0),
            bytes_freed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            safety_incidents: AtomicU64::new(0),
            audit_write_errors: AtomicU64::new(0),
            per_path_bytes_deleted,
            daemon_restarts,
            root_free_percent,
            last_cleanup_timestamp,
            last_cleanup_mode,
            daemon_healthy: AtomicI64::new(1),
            component_healthy,
            cleanup_cycle_duration,
            health_check_duration,
            label_lock: Mutex::new(()),
        }
    }

    pub fn record_bytes_deleted_for_root(&self, root: &str, bytes: u64) {
        let _guard = self.label_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.per_path_bytes_deleted.with_label_values(&[root]).inc_by(bytes);
    }

    pub fn record_restart(&self, reason: &str) {
        let _guard = self.label_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.daemon_restarts.with_label_values(&[reason]).inc();
    }

    pub fn set_root_free_percent(&self, root: &str, free_pct: f64) {
        let _guard = self.label_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        #[allow(clippy::cast_possible_truncation)]
        self.root_free_percent.with_label_values(&[root]).set(free_pct as i64);
    }

    pub fn set_last_cleanup(&self, root: &str, mode: &str, unix_timestamp: i64) {
        let _guard = self.label_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.last_cleanup_timestamp.with_label_values(&[root]).set(unix_timestamp);
        self.last_cleanup_mode.with_label_values(&[root, mode]).set(1);
    }

    pub fn set_component_healthy(&self, component: &str, healthy: bool) {
        let _guard = self.label_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.component_healthy.with_label_values(&[component]).set(i64::from(healthy));
    }

    pub fn set_daemon_healthy(&self, healthy: bool) {
        self.daemon_healthy.store(i64::from(healthy), Ordering::Relaxed);
    }

    pub fn observe_cycle_duration(&self, seconds: f64) {
        self.cleanup_cycle_duration.observe(seconds);
    }

    pub fn observe_health_check_duration(&self, seconds: f64) {
        self.health_check_duration.observe(seconds);
    }

    /// Render every registered metric family in Prometheus text exposition
    /// format.
    ///
    /// # Errors
    ///
    /// Returns an error if the text encoder fails, which only happens on
    /// malformed metric families (a programming error, not a runtime one).
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        let families = self.registry.gather();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
