//! Supervisor: owns the daemon lifecycle end to end (spec §4.10) — startup,
//! signal handling, the tick loop, and graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::audit::AuditStore;
use crate::core::config::{Config, Root};
use crate::core::errors::{Result, SsError};
use crate::daemon::signals::{ShutdownCoordinator, SignalHandler, WatchdogHeartbeat};
use crate::deleter::{Deleter, DryRunDeleter, RealDeleter};
use crate::executor::CleanupExecutor;
use crate::limiter::CpuLimiter;
use crate::logger::sink::{Level, LogSink, LogSinkConfig};
use crate::metrics::Metrics;
use crate::metrics::health::{HealthMonitor, standard_probes};
use crate::metrics::server::MetricsServer;
use crate::platform::pal;
use crate::probe::{DiskProbe, require_responsive_mount};
use crate::scanner::{self, Strategy};
use crate::validator::{AllowedRoots, ProtectedSet};

const METRICS_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Per-root strategy chosen for the current tick, or no-op when nothing
/// qualifies (spec §4.10 decision table).
enum Decision {
    Run(Strategy),
    Noop,
}

fn decide_strategy(root: &Root, free_percent: f64) -> Decision {
    if free_percent <= 100.0 - root.stack_threshold_percent {
        Decision::Run(Strategy::Stack)
    } else if free_percent < root.min_free_percent {
        Decision::Run(Strategy::Disk)
    } else if root.age_off_days > 0 {
        Decision::Run(Strategy::Age)
    } else {
        Decision::Noop
    }
}

/// Owns every long-lived capability and drives the tick loop.
pub struct Supervisor {
    config: Mutex<Arc<Config>>,
    probe: DiskProbe,
    deleter: Box<dyn Deleter>,
    audit: Arc<AuditStore>,
    log: Mutex<LogSink>,
    metrics: Arc<Metrics>,
    health: Arc<HealthMonitor>,
    metrics_server_alive: Arc<AtomicBool>,
    metrics_server: Mutex<Option<MetricsServer>>,
    limiter: CpuLimiter,
    cancelled: Arc<AtomicBool>,
    signals: SignalHandler,
    watchdog: Mutex<WatchdogHeartbeat>,
    dry_run: bool,
}

impl Supervisor {
    /// Run the full startup sequence: open the log sink, audit store, and
    /// metrics server, in that order, then install signal handlers.
    ///
    /// # Errors
    ///
    /// Returns the first initialization failure; the caller maps it to a
    /// process exit code via [`SsError::exit_code`].
    pub fn start(config: Config, dry_run: bool) -> Result<Self> {
        let config = Arc::new(config);
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut log = LogSink::open(LogSinkConfig {
            path: config.logging.path.clone(),
            rotation_days: config.logging.rotation_days,
        });
        if dry_run {
            log.log_event(Level::Info, "starting in dry-run mode: no file will be deleted");
        }

        let audit = Arc::new(AuditStore::open(&config.database_path)?);

        let platform = pal::detect_platform()?;
        let probe = DiskProbe::new(platform);

        let metrics = Arc::new(Metrics::new());
        let metrics_server_alive = Arc::new(AtomicBool::new(false));
        let health = Arc::new(HealthMonitor::new(standard_probes(
            Arc::clone(&audit),
            Arc::clone(&config),
            Arc::clone(&metrics_server_alive),
        )));

        let addr = format!("0.0.0.0:{}", config.prometheus.port)
            .parse()
            .map_err(|e| SsError::MetricsServerError {
                details: format!("invalid metrics bind address: {e}"),
            })?;
        let metrics_server = MetricsServer::start(addr, Arc::clone(&metrics), Arc::clone(&health))?;
        metrics_server_alive.store(true, Ordering::Relaxed);

        let deleter: Box<dyn Deleter> = if dry_run { Box::new(DryRunDeleter) } else { Box::new(RealDeleter) };
        let limiter = CpuLimiter::new(config.resource_limits.max_cpu_percent, Duration::from_secs(1), Arc::clone(&cancelled));

        Ok(Self {
            config: Mutex::new(config),
            probe,
            deleter,
            audit,
            log: Mutex::new(log),
            metrics,
            health,
            metrics_server_alive,
            metrics_server: Mutex::new(Some(metrics_server)),
            limiter,
            cancelled,
            signals: SignalHandler::new(),
            watchdog: Mutex::new(WatchdogHeartbeat::disabled()),
            dry_run,
        })
    }

    /// Run exactly one full iteration over every root, then return.
    pub fn run_once(&self) {
        self.run_cycle();
    }

    /// Tick every `interval_minutes`, handling signals between and during
    /// ticks, until a shutdown is requested.
    pub fn run_forever(&self) {
        let mut watchdog = WatchdogHeartbeat::new(watchdog_sec_from_env());
        loop {
            if self.signals.should_shutdown() {
                break;
            }
            if self.signals.should_reload() {
                self.reload_config();
            }

            self.run_cycle();

            let interval = Duration::from_secs(self.config.lock().interval_minutes * 60);
            let tick_start = Instant::now();
            while tick_start.elapsed() < interval {
                if self.signals.should_shutdown() {
                    return self.shutdown();
                }
                if self.signals.should_reload() {
                    self.reload_config();
                }
                if self.signals.should_scan() {
                    break;
                }
                watchdog.maybe_notify("waiting for next tick");
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        self.shutdown();
    }

    fn reload_config(&self) {
        let path = self.config.lock().config_path.clone();
        let Some(path) = path else {
            return;
        };
        match Config::load(&path) {
            Ok(fresh) => {
                *self.config.lock() = Arc::new(fresh);
                self.log.lock().log_event(Level::Info, "configuration reloaded");
            }
            Err(err) => {
                self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
                self.log.lock().log_event(Level::Error, &format!("config reload rejected, keeping previous config: {err}"));
            }
        }
    }

    /// One pass over every root in ascending priority order.
    fn run_cycle(&self) {
        let cycle_start = Instant::now();
        let config = Arc::clone(&self.config.lock());
        let roots = config.build_roots();
        let allowed = AllowedRoots::new(roots.iter().map(|r| r.path.clone()).collect());
        let protected = ProtectedSet::new(config.safety.additional_protected_paths.clone());
        let nfs_timeout = Duration::from_secs(config.nfs_timeout_seconds);

        self.health.run_once();
        self.ensure_metrics_server(&config);

        let mut audit_failed_this_cycle = false;

        for root in &roots {
            if self.signals.should_shutdown() {
                break;
            }
            self.watchdog.lock().maybe_notify("running cleanup cycle");

            if let Err(err) = require_responsive_mount(&self.probe, &root.path, nfs_timeout) {
                self.log.lock().log_event(Level::Warn, &format!("skipping stale mount {}: {err}", root.path.display()));
                self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let free_percent = match self.probe.free_percent(&root.path) {
                Ok(pct) => pct,
                Err(err) => {
                    self.log.lock().log_event(Level::Warn, &format!("skipping {}: {err}", root.path.display()));
                    self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            self.metrics.set_root_free_percent(&root.path.to_string_lossy(), free_percent);

            let strategy = match decide_strategy(root, free_percent) {
                Decision::Run(strategy) => strategy,
                Decision::Noop => {
                    self.record_cycle_end(root, "NOOP");
                    continue;
                }
            };

            if strategy == Strategy::Stack {
                self.log.lock().log_event(Level::Warn, &format!("STACK emergency cleanup activated for {}", root.path.display()));
            }

            let candidates = match scanner::scan(root, strategy, std::time::SystemTime::now()) {
                Ok(candidates) => candidates,
                Err(err) => {
                    self.log.lock().log_event(Level::Warn, &format!("scan of {} failed: {err}", root.path.display()));
                    self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let executor = CleanupExecutor {
                deleter: self.deleter.as_ref(),
                audit: &self.audit,
                log: &self.log,
                metrics: &self.metrics,
                limiter: &self.limiter,
                allowed_roots: &allowed,
                protected: &protected,
            };
            let mode_label = strategy_label(strategy);
            let stats = executor.run(candidates, strategy, &root.path, root.target_free_percent, &self.probe, mode_label);

            if stats.errors > 0 && !self.audit.is_reachable() {
                audit_failed_this_cycle = true;
            }

            self.record_cycle_end(root, mode_label);
            let _ = stats;
        }

        self.metrics.set_component_healthy("audit_store", !audit_failed_this_cycle);
        self.health.run_once();
        self.metrics.set_daemon_healthy(matches!(self.health.status(), crate::metrics::health::Status::Healthy));
        self.log.lock().rotate_on_day_boundary();
        self.metrics.observe_cycle_duration(cycle_start.elapsed().as_secs_f64());
    }

    /// Restart the metrics server if its accept loop has died since the
    /// last tick, per the documented crash-recovery behavior; a repeat
    /// bind failure just leaves it down for another cycle.
    fn ensure_metrics_server(&self, config: &Config) {
        let mut slot = self.metrics_server.lock();
        let still_alive = slot.as_ref().is_some_and(MetricsServer::is_alive);
        if still_alive {
            return;
        }
        self.metrics.set_component_healthy("metrics_server", false);
        self.metrics_server_alive.store(false, Ordering::Relaxed);

        let Ok(addr) = format!("0.0.0.0:{}", config.prometheus.port).parse() else {
            return;
        };
        match MetricsServer::start(addr, Arc::clone(&self.metrics), Arc::clone(&self.health)) {
            Ok(server) => {
                *slot = Some(server);
                self.metrics_server_alive.store(true, Ordering::Relaxed);
                self.metrics.set_component_healthy("metrics_server", true);
                self.log.lock().log_event(Level::Info, "metrics server restarted after unexpected exit");
            }
            Err(err) => {
                self.log.lock().log_event(Level::Error, &format!("metrics server restart failed, retrying next tick: {err}"));
            }
        }
    }

    fn record_cycle_end(&self, root: &Root, mode_label: &str) {
        #[allow(clippy::cast_possible_truncation)]
        let now = chrono::Utc::now().timestamp();
        self.metrics.set_last_cleanup(&root.path.to_string_lossy(), mode_label, now);
    }

    /// Cancel the running cycle, flush and close every subsystem, and stop
    /// the metrics server within its grace period.
    pub fn shutdown(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        let coordinator = ShutdownCoordinator::new();

        let flush_logs = || -> bool {
            self.log.lock().flush();
            true
        };
        let stop_metrics = || -> bool {
            if let Some(server) = self.metrics_server.lock().take() {
                server.shutdown(METRICS_SHUTDOWN_DEADLINE);
                self.metrics_server_alive.store(false, Ordering::Relaxed);
            }
            true
        };

        let tasks: Vec<(&str, &dyn Fn() -> bool)> = vec![("flush logs", &flush_logs), ("stop metrics server", &stop_metrics)];
        coordinator.execute(&tasks);
    }

    /// Whether this supervisor is running with a non-destructive deleter.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

fn watchdog_sec_from_env() -> u64 {
    std::env::var("WATCHDOG_USEC").ok().and_then(|raw| raw.parse::<u64>().ok()).map_or(0, |usec| usec / 1_000_000)
}

const fn strategy_label(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Age => "AGE",
        Strategy::Disk => "DISK",
        Strategy::Stack => "STACK",
    }
}
