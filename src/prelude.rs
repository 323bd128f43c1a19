//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use storage_sage::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, Root};
pub use crate::core::errors::{Result, SsError};

// Platform
pub use crate::platform::pal::{FsStats, MountPoint, Platform, detect_platform};

// Disk Probe
pub use crate::probe::{DiskProbe, require_responsive_mount};

// Safety Validator
pub use crate::validator::{AllowedRoots, ProtectedSet, RejectReason, validate_delete_target};

// Scanner
pub use crate::scanner::{Candidate, PrimaryReason, Strategy, scan};

// Deleter
pub use crate::deleter::{DeleteOutcome, Deleter, DryRunDeleter, ObjectType, RealDeleter};

// Cleanup Executor
pub use crate::executor::{CleanupExecutor, CycleStats};

// Audit Store
pub use crate::audit::{AuditStore, DeletionRecord, RecordAction, SummaryStats};

// Log Sink
pub use crate::logger::sink::{Level, LogSink, LogSinkConfig};

// Metrics & Health
pub use crate::metrics::Metrics;
pub use crate::metrics::health::{HealthMonitor, Status};
pub use crate::metrics::server::MetricsServer;

// CPU Limiter
pub use crate::limiter::{CpuLimiter, ThrottleOutcome};

// Daemon
pub use crate::daemon::signals::{ShutdownCoordinator, SignalHandler, WatchdogHeartbeat};
pub use crate::daemon::supervisor::Supervisor;
