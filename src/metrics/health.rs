//! Health subsystem: periodic probes of critical components, each with its
//! own timeout and consecutive-failure counter (spec §4.7).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Overall health verdict: AND of all critical components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Degraded,
    Down,
}

/// Per-component health record.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub last_check: Instant,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl HealthState {
    fn fresh() -> Self {
        Self {
            last_check: Instant::now(),
            healthy: true,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// A single named probe with its own timeout.
pub struct Probe {
    pub name: &'static str,
    pub timeout: Duration,
    pub check: Box<dyn Fn() -> Result<(), String> + Send + Sync>,
}

/// Runs a set of probes and keeps per-component [`HealthState`].
pub struct HealthMonitor {
    probes: Vec<Probe>,
    states: RwLock<Vec<HealthState>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(probes: Vec<Probe>) -> Self {
        let states = probes.iter().map(|_| HealthState::fresh()).collect();
        Self {
            probes,
            states: RwLock::new(states),
        }
    }

    /// Run every probe once, updating per-component state. A probe that
    /// doesn't return within its own timeout is treated as a failure (the
    /// probe closure runs synchronously on this thread; callers with
    /// potentially-blocking probes should build their own timeout into the
    /// closure, as [`crate::probe::DiskProbe::is_stale_mount`] does).
    pub fn run_once(&self) {
        let mut states = self.states.write();
        for (probe, state) in self.probes.iter().zip(states.iter_mut()) {
            let started = Instant::now();
            let result = (probe.check)();
            state.last_check = started;
            match result {
                Ok(()) => {
                    state.healthy = true;
                    state.consecutive_failures = 0;
                    state.last_error = None;
                }
                Err(message) => {
                    state.healthy = false;
                    state.consecutive_failures += 1;
                    state.last_error = Some(message);
                }
            }
        }
    }

    /// Overall status: AND of every component's current health.
    #[must_use]
    pub fn status(&self) -> Status {
        let states = self.states.read();
        if states.is_empty() {
            return Status::Healthy;
        }
        let healthy_count = states.iter().filter(|s| s.healthy).count();
        if healthy_count == states.len() {
            Status::Healthy
        } else if healthy_count == 0 {
            Status::Down
        } else {
            Status::Degraded
        }
    }

    /// Snapshot of (name, state) pairs for `/health` JSON and CLI reporting.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, HealthState)> {
        let states = self.states.read();
        self.probes.iter().zip(states.iter()).map(|(p, s)| (p.name, s.clone())).collect()
    }
}

/// Build the standard probe set: audit store reachability, configuration
/// validity, metrics server liveness.
#[must_use]
pub fn standard_probes(
    audit: Arc<crate::audit::AuditStore>,
    config: Arc<crate::core::config::Config>,
    metrics_server_alive: Arc<std::sync::atomic::AtomicBool>,
) -> Vec<Probe> {
    vec![
        Probe {
            name: "audit_store",
            timeout: Duration::from_secs(5),
            check: Box::new(move || {
                if audit.is_reachable() {
                    Ok(())
                } else {
                    Err("audit store is not reachable".to_string())
                }
            }),
        },
        Probe {
            name: "configuration",
            timeout: Duration::from_secs(5),
            check: Box::new(move || config.validate().map_err(|e| e.to_string())),
        },
        Probe {
            name: "metrics_server",
            timeout: Duration::from_secs(5),
            check: Box::new(move || {
                if metrics_server_alive.load(std::sync::atomic::Ordering::Relaxed) {
                    Ok(())
                } else {
                    Err("metrics server is not running".to_string())
                }
            }),
        },
    ]
}
