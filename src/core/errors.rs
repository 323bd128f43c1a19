//! SS-prefixed error types with structured error codes, one variant per error
//! kind named in the daemon's error-handling design.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SsError>;

/// Process exit codes tied to the error kinds below.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_CONFIG: i32 = 2;
    pub const SAFETY_VIOLATION: i32 = 3;
    pub const RUNTIME_ERROR: i32 = 4;
}

/// Top-level error type for StorageSage.
#[derive(Debug, Error)]
pub enum SsError {
    #[error("[SS-1000] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SS-1001] safety violation for {path}: {reason}")]
    SafetyViolation { path: PathBuf, reason: String },

    #[error("[SS-1002] stale mount at {path}: probe exceeded {timeout_secs}s")]
    StaleMount { path: PathBuf, timeout_secs: u64 },

    #[error("[SS-1003] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[SS-1004] not found: {path}")]
    NotFound { path: PathBuf },

    #[error("[SS-1005] IO failure at {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SS-1006] audit store write failure: {details}")]
    AuditWriteError { details: String },

    #[error("[SS-1007] metrics server failure: {details}")]
    MetricsServerError { details: String },

    #[error("[SS-1008] health probe failure for {component}: {details}")]
    HealthProbeError { component: &'static str, details: String },

    #[error("[SS-1009] internal error: {details}")]
    Internal { details: String },
}

impl SsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SS-1000",
            Self::SafetyViolation { .. } => "SS-1001",
            Self::StaleMount { .. } => "SS-1002",
            Self::PermissionDenied { .. } => "SS-1003",
            Self::NotFound { .. } => "SS-1004",
            Self::IoError { .. } => "SS-1005",
            Self::AuditWriteError { .. } => "SS-1006",
            Self::MetricsServerError { .. } => "SS-1007",
            Self::HealthProbeError { .. } => "SS-1008",
            Self::Internal { .. } => "SS-1009",
        }
    }

    /// Whether retrying might resolve the failure without operator action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleMount { .. }
                | Self::IoError { .. }
                | Self::AuditWriteError { .. }
                | Self::MetricsServerError { .. }
                | Self::HealthProbeError { .. }
        )
    }

    /// The process exit code a startup failure of this kind should produce.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig { .. } => exit_code::INVALID_CONFIG,
            Self::SafetyViolation { .. } => exit_code::SAFETY_VIOLATION,
            _ => exit_code::RUNTIME_ERROR,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SsError {
    fn from(value: rusqlite::Error) -> Self {
        Self::AuditWriteError {
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SsError {
    fn from(value: toml::de::Error) -> Self {
        Self::InvalidConfig {
            details: value.to_string(),
        }
    }
}
