//! Daemon configuration: TOML-backed, with environment-variable overrides
//! and an exhaustive [`Config::validate`]. A `Root` is process-wide state
//! with an init/reload lifecycle — the Supervisor snapshots one immutable
//! copy of the merged root list at the start of each cycle (spec §9).

#![allow(missing_docs)]

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SsError};
use crate::validator::{AllowedRoots, ProtectedSet, validate_delete_target};

/// Default listen port for the Prometheus metrics endpoint.
pub const DEFAULT_PROMETHEUS_PORT: u16 = 9090;
/// Default tick period between cycles, in minutes.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;
/// Default log retention / rotation window, in days.
pub const DEFAULT_ROTATION_DAYS: u32 = 30;
/// Default cooperative CPU budget, as a percentage.
pub const DEFAULT_MAX_CPU_PERCENT: f64 = 10.0;
/// Default stale-mount probe timeout, in seconds.
pub const DEFAULT_NFS_TIMEOUT_SECONDS: u64 = 5;
/// Default path the daemon reads its configuration from.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/storage-sage/config.toml";

/// A single managed directory tree, fully resolved after merging global
/// defaults with any per-path override (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    pub path: PathBuf,
    pub age_off_days: u32,
    pub min_free_percent: f64,
    pub max_free_percent: f64,
    pub target_free_percent: f64,
    pub priority: i64,
    pub stack_threshold_percent: f64,
    pub stack_age_days: u32,
    pub recursive: bool,
    pub delete_dirs: bool,
}

impl Root {
    /// Enforce the invariants from spec §3.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::InvalidConfig`] describing the first violated
    /// invariant.
    pub fn validate_invariants(&self) -> Result<()> {
        if !self.path.is_absolute() {
            return invalid(format!("root path must be absolute: {}", self.path.display()));
        }
        if !(0.0..=self.max_free_percent).contains(&self.target_free_percent) {
            return invalid(format!(
                "root {}: target_free_percent ({}) must be within [0, max_free_percent ({})]",
                self.path.display(),
                self.target_free_percent,
                self.max_free_percent
            ));
        }
        if !(0.0..=100.0).contains(&self.max_free_percent) {
            return invalid(format!(
                "root {}: max_free_percent ({}) must be within [0, 100]",
                self.path.display(),
                self.max_free_percent
            ));
        }
        if self.stack_threshold_percent < self.max_free_percent {
            return invalid(format!(
                "root {}: stack_threshold_percent ({}) must be >= max_free_percent ({})",
                self.path.display(),
                self.stack_threshold_percent,
                self.max_free_percent
            ));
        }
        if self.stack_age_days > self.age_off_days {
            return invalid(format!(
                "root {}: stack_age_days ({}) must be <= age_off_days ({}) — emergency mode must be at least as aggressive",
                self.path.display(),
                self.stack_age_days,
                self.age_off_days
            ));
        }
        Ok(())
    }
}

fn invalid(details: String) -> Result<()> {
    Err(SsError::InvalidConfig { details })
}

/// Per-path override. Every field is optional; unset fields inherit the
/// global default, set fields win field-by-field (spec §9's resolution of
/// the merge-vs-override open question).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RootOverride {
    pub path: PathBuf,
    #[serde(default)]
    pub age_off_days: Option<u32>,
    #[serde(default)]
    pub min_free_percent: Option<f64>,
    #[serde(default)]
    pub max_free_percent: Option<f64>,
    #[serde(default)]
    pub target_free_percent: Option<f64>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub stack_threshold_percent: Option<f64>,
    #[serde(default)]
    pub stack_age_days: Option<u32>,
    #[serde(default)]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub delete_dirs: Option<bool>,
}

/// Global defaults applied to every Root before per-path overrides merge in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalDefaults {
    pub age_off_days: u32,
    pub min_free_percent: f64,
    pub max_free_percent: f64,
    pub target_free_percent: f64,
    pub stack_threshold_percent: f64,
    pub stack_age_days: u32,
    pub recursive: bool,
    pub delete_dirs: bool,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            age_off_days: 30,
            min_free_percent: 20.0,
            max_free_percent: 30.0,
            target_free_percent: 25.0,
            stack_threshold_percent: 95.0,
            stack_age_days: 7,
            recursive: true,
            delete_dirs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrometheusConfig {
    pub port: u16,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PROMETHEUS_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub rotation_days: u32,
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rotation_days: DEFAULT_ROTATION_DAYS,
            path: PathBuf::from("/var/log/storage-sage/storage-sage.log"),
            fallback_path: Some(PathBuf::from("/tmp/storage-sage.log")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceLimitsConfig {
    pub max_cpu_percent: f64,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
        }
    }
}

/// Protected-set extensions; additive only (spec §4.1/§9).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub additional_protected_paths: Vec<PathBuf>,
}

/// Top-level daemon configuration (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan_paths: Vec<PathBuf>,
    pub paths: Vec<RootOverride>,
    #[serde(flatten)]
    pub defaults: GlobalDefaults,
    pub interval_minutes: u64,
    pub prometheus: PrometheusConfig,
    pub database_path: PathBuf,
    pub logging: LoggingConfig,
    pub resource_limits: ResourceLimitsConfig,
    pub safety: SafetyConfig,
    pub nfs_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub health_probe_timeout_seconds: u64,
    /// Source path this configuration was loaded from, if any. Not part of
    /// the wire format.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_paths: Vec::new(),
            paths: Vec::new(),
            defaults: GlobalDefaults::default(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            prometheus: PrometheusConfig::default(),
            database_path: PathBuf::from("/var/lib/storage-sage/audit.db"),
            logging: LoggingConfig::default(),
            resource_limits: ResourceLimitsConfig::default(),
            safety: SafetyConfig::default(),
            nfs_timeout_seconds: DEFAULT_NFS_TIMEOUT_SECONDS,
            health_check_interval_seconds: 30,
            health_probe_timeout_seconds: 5,
            config_path: None,
        }
    }
}

impl Config {
    /// Load, apply environment overrides, and validate a configuration from
    /// a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::InvalidConfig`] if the file is unreadable,
    /// malformed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| SsError::InvalidConfig {
            details: format!("cannot read config file {}: {source}", path.display()),
        })?;
        let mut cfg: Self = toml::from_str(&raw)?;
        cfg.config_path = Some(path.to_path_buf());
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build the fully-merged, priority-ordered list of Roots. Priority
    /// defaults to each root's position in `scan_paths` followed by any
    /// override-only paths, in the order encountered, when not explicitly
    /// set.
    #[must_use]
    pub fn build_roots(&self) -> Vec<Root> {
        let mut by_path: Vec<(PathBuf, RootOverride)> = Vec::new();

        for p in &self.scan_paths {
            by_path.push((p.clone(), RootOverride {
                path: p.clone(),
                ..RootOverride::default()
            }));
        }
        for o in &self.paths {
            if let Some(existing) = by_path.iter_mut().find(|(p, _)| p == &o.path) {
                existing.1 = merge_overrides(&existing.1, o);
            } else {
                by_path.push((o.path.clone(), o.clone()));
            }
        }

        by_path
            .into_iter()
            .enumerate()
            .map(|(index, (path, ov))| self.resolve_root(path, &ov, index))
            .collect::<Vec<_>>()
            .tap_sort_by_priority()
    }

    fn resolve_root(&self, path: PathBuf, ov: &RootOverride, index: usize) -> Root {
        let d = &self.defaults;
        Root {
            path,
            age_off_days: ov.age_off_days.unwrap_or(d.age_off_days),
            min_free_percent: ov.min_free_percent.unwrap_or(d.min_free_percent),
            max_free_percent: ov.max_free_percent.unwrap_or(d.max_free_percent),
            target_free_percent: ov.target_free_percent.unwrap_or(d.target_free_percent),
            #[allow(clippy::cast_possible_wrap)]
            priority: ov.priority.unwrap_or(index as i64),
            stack_threshold_percent: ov.stack_threshold_percent.unwrap_or(d.stack_threshold_percent),
            stack_age_days: ov.stack_age_days.unwrap_or(d.stack_age_days),
            recursive: ov.recursive.unwrap_or(d.recursive),
            delete_dirs: ov.delete_dirs.unwrap_or(d.delete_dirs),
        }
    }

    /// Exhaustive validation of the configuration and its merged roots.
    ///
    /// # Errors
    ///
    /// Returns [`SsError::InvalidConfig`] describing the first violated
    /// invariant, or [`SsError::SafetyViolation`] if a root equals or is
    /// contained in the hard-coded protected set.
    pub fn validate(&self) -> Result<()> {
        if self.scan_paths.is_empty() && self.paths.is_empty() {
            return invalid("at least one root must be configured via scan_paths or paths".to_string());
        }
        if self.interval_minutes == 0 {
            return invalid("interval_minutes must be > 0".to_string());
        }
        if self.defaults.min_free_percent > self.defaults.max_free_percent {
            return invalid(format!(
                "min_free_percent ({}) must be <= max_free_percent ({})",
                self.defaults.min_free_percent, self.defaults.max_free_percent
            ));
        }
        if self.defaults.stack_threshold_percent < self.defaults.max_free_percent {
            return invalid(format!(
                "stack_threshold_percent ({}) must be >= max_free_percent ({})",
                self.defaults.stack_threshold_percent, self.defaults.max_free_percent
            ));
        }
        if !self.database_path.is_absolute() {
            return invalid("database_path must be absolute".to_string());
        }

        let roots = self.build_roots();
        let protected = ProtectedSet::new(self.safety.additional_protected_paths.clone());
        let allowed = AllowedRoots::new(roots.iter().map(|r| r.path.clone()).collect());

        for root in &roots {
            root.validate_invariants()?;
            // A root must not itself sit inside the protected set.
            if validate_delete_target(&root.path, &allowed, &protected).is_err()
                && root_is_protected(&root.path, &protected)
            {
                return Err(SsError::SafetyViolation {
                    path: root.path.clone(),
                    reason: "configured root equals or is contained in the protected path set".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Deterministic hash of the effective config, for reload-change
    /// detection and log lines. FNV-1a is used for cross-process stability
    /// (the hash must not vary across Rust releases the way `DefaultHasher`
    /// can).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self).map_err(|e| SsError::Internal {
            details: format!("config serialization failed: {e}"),
        })?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_u64("STORAGE_SAGE_INTERVAL_MINUTES", &mut self.interval_minutes)?;
        set_env_u16("STORAGE_SAGE_PROMETHEUS_PORT", &mut self.prometheus.port)?;
        set_env_u64("STORAGE_SAGE_NFS_TIMEOUT_SECONDS", &mut self.nfs_timeout_seconds)?;
        set_env_f64("STORAGE_SAGE_MIN_FREE_PERCENT", &mut self.defaults.min_free_percent)?;
        set_env_f64("STORAGE_SAGE_MAX_FREE_PERCENT", &mut self.defaults.max_free_percent)?;
        set_env_f64("STORAGE_SAGE_TARGET_FREE_PERCENT", &mut self.defaults.target_free_percent)?;
        set_env_u32("STORAGE_SAGE_AGE_OFF_DAYS", &mut self.defaults.age_off_days)?;
        set_env_u32("STORAGE_SAGE_ROTATION_DAYS", &mut self.logging.rotation_days)?;
        set_env_f64(
            "STORAGE_SAGE_MAX_CPU_PERCENT",
            &mut self.resource_limits.max_cpu_percent,
        )?;
        set_env_bool("STORAGE_SAGE_RECURSIVE", &mut self.defaults.recursive)?;
        set_env_bool("STORAGE_SAGE_DELETE_DIRS", &mut self.defaults.delete_dirs)?;
        if let Some(raw) = env_var("STORAGE_SAGE_DATABASE_PATH") {
            self.database_path = PathBuf::from(raw);
        }
        Ok(())
    }
}

fn root_is_protected(path: &Path, protected: &ProtectedSet) -> bool {
    // Re-derive the same lexical check the validator performs, scoped to
    // whether the rejection reason is specifically protected-path (an
    // outside-root/traversal rejection here would be a config bug of a
    // different kind, already caught elsewhere).
    let allow_self = AllowedRoots::new(vec![path.to_path_buf()]);
    matches!(
        validate_delete_target(path, &allow_self, protected),
        Err(crate::validator::RejectReason::ProtectedPath)
    )
}

fn merge_overrides(base: &RootOverride, incoming: &RootOverride) -> RootOverride {
    RootOverride {
        path: base.path.clone(),
        age_off_days: incoming.age_off_days.or(base.age_off_days),
        min_free_percent: incoming.min_free_percent.or(base.min_free_percent),
        max_free_percent: incoming.max_free_percent.or(base.max_free_percent),
        target_free_percent: incoming.target_free_percent.or(base.target_free_percent),
        priority: incoming.priority.or(base.priority),
        stack_threshold_percent: incoming.stack_threshold_percent.or(base.stack_threshold_percent),
        stack_age_days: incoming.stack_age_days.or(base.stack_age_days),
        recursive: incoming.recursive.or(base.recursive),
        delete_dirs: incoming.delete_dirs.or(base.delete_dirs),
    }
}

trait SortByPriority {
    fn tap_sort_by_priority(self) -> Self;
}

impl SortByPriority for Vec<Root> {
    fn tap_sort_by_priority(mut self) -> Self {
        self.sort_by_key(|r| r.priority);
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env_f64(name: &str, slot: &mut f64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<f64>().map_err(|error| SsError::InvalidConfig {
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u64>().map_err(|error| SsError::InvalidConfig {
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_u32(name: &str, slot: &mut u32) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u32>().map_err(|error| SsError::InvalidConfig {
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_u16(name: &str, slot: &mut u16) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u16>().map_err(|error| SsError::InvalidConfig {
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_bool(name: &str, slot: &mut bool) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(SsError::InvalidConfig {
                    details: format!("{name}={other:?}: expected a boolean"),
                });
            }
        };
    }
    Ok(())
}
