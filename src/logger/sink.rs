//! Log Sink: human-oriented line log with age-based rotation (spec §4.8).
//!
//! Every attempted deletion produces one audit row (via [`crate::audit`])
//! and, in parallel, one line here in the external line format from spec
//! §6. Also used for free-form startup/shutdown/warning banners that have
//! no corresponding audit row.
//!
//! Degradation chain, adapted from the teacher's JSONL writer: primary path
//! → stderr → discard. There is no RAM-backed fallback path in this sink's
//! configuration, so the chain is shorter than the teacher's.

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Utc};

use crate::audit::DeletionRecord;
use crate::core::errors::{Result, SsError};

/// Severity for free-form event lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Configuration for the log sink.
#[derive(Debug, Clone)]
pub struct LogSinkConfig {
    /// Primary log file path.
    pub path: PathBuf,
    /// Rotated files (and the primary, at startup) older than this many
    /// days are purged / rotated away.
    pub rotation_days: u32,
}

/// Line-structured log writer with startup/day-boundary age rotation and a
/// stdout mirror for supervisor collection.
pub struct LogSink {
    config: LogSinkConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    opened_day: u32,
}

impl LogSink {
    /// Open the log sink. Performs the startup age check before the first
    /// write: if the existing file is older than `rotation_days`, it is
    /// rotated (renamed with a timestamp suffix) before a fresh file is
    /// opened. Falls through the degradation chain on failure; a sink that
    /// can open nothing still functions in [`WriterState::Discard`] rather
    /// than panicking the daemon.
    pub fn open(config: LogSinkConfig) -> Self {
        let mut sink = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            opened_day: Utc::now().ordinal(),
        };
        sink.rotate_if_stale_at_startup();
        sink.try_open_primary();
        sink
    }

    /// Write one event line for a recorded Executor decision, in the exact
    /// external format: `[<iso8601>] <ACTION> path=<p> object=<basename>
    /// type=<file|dir|symlink> size=<bytes> primary_reason=<tag>
    /// [secondary_reason=<tag>] [error=<msg>]`.
    pub fn log_record(&mut self, record: &DeletionRecord) {
        let mut line = format!(
            "[{}] {} path={} object={} type={} size={} primary_reason={}",
            format_ts(record.timestamp),
            record.action.as_str(),
            record.path.display(),
            record.object_name,
            external_object_type(&record.object_type),
            record.size,
            record.primary_reason,
        );
        if let Some(secondary) = &record.secondary_reason {
            line.push_str(&format!(" secondary_reason={secondary}"));
        }
        if let Some(error) = &record.error_message {
            line.push_str(&format!(" error={error}"));
        }
        line.push('\n');
        self.write_line(&line);
    }

    /// Write a free-form banner/warning line with no associated audit row
    /// (dry-run startup banner, STACK-mode activation warning, reload
    /// failures, and the like).
    pub fn log_event(&mut self, level: Level, message: &str) {
        let line = format!("[{}] {} {message}\n", format_ts(Utc::now()), level.as_str());
        self.write_line(&line);
    }

    /// Flush buffered output.
    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Current degradation state, for `/health` reporting.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Opportunistic day-boundary rotation: call once per tick. A no-op
    /// unless UTC's day-of-year has advanced since the file was opened.
    pub fn rotate_on_day_boundary(&mut self) {
        let today = Utc::now().ordinal();
        if today == self.opened_day || self.state == WriterState::Discard {
            return;
        }
        self.rotate();
        self.opened_day = today;
        self.purge_expired_rotations();
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        match self.state {
            WriterState::Normal => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    let _ = w.flush();
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[STORAGE-SAGE] {line}");
            }
            WriterState::Discard => {}
        }
        print!("{line}");
        let _ = io::stdout().flush();
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok(file) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.state = WriterState::Normal;
            }
            Err(source) => {
                let _ = writeln!(io::stderr(), "[STORAGE-SAGE] log sink primary path failed ({source}), using stderr");
                self.state = WriterState::Stderr;
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(io::stderr(), "[STORAGE-SAGE] log sink write failed, falling back to stderr");
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    fn rotate_if_stale_at_startup(&mut self) {
        let Ok(metadata) = fs::metadata(&self.config.path) else {
            return;
        };
        let Ok(modified) = metadata.modified() else {
            return;
        };
        let age_days = SystemTime::now()
            .duration_since(modified)
            .map(|d| d.as_secs() / 86_400)
            .unwrap_or(0);
        if age_days >= u64::from(self.config.rotation_days) {
            let rotated = rotated_name(&self.config.path, Utc::now());
            let _ = rename(&self.config.path, &rotated);
            self.purge_expired_rotations();
        }
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;
        if self.state == WriterState::Discard {
            return;
        }
        let rotated = rotated_name(&self.config.path, Utc::now());
        let _ = rename(&self.config.path, &rotated);
        self.try_open_primary();
    }

    fn purge_expired_rotations(&self) {
        let Some(dir) = self.config.path.parent() else {
            return;
        };
        let Some(base_name) = self.config.path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let cutoff = SystemTime::now() - std::time::Duration::from_secs(u64::from(self.config.rotation_days) * 86_400);
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(base_name) || name == base_name {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if let Ok(modified) = metadata.modified() {
                    if modified < cutoff {
                        let _ = fs::remove_file(entry.path());
                    }
                }
            }
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| SsError::io(parent, source))?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).map_err(|source| SsError::io(path, source))
}

fn rotated_name(base: &Path, at: DateTime<Utc>) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{}", at.format("%Y%m%dT%H%M%SZ")));
    PathBuf::from(name)
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn external_object_type(stored: &str) -> &str {
    match stored {
        "directory" => "dir",
        other => other,
    }
}
