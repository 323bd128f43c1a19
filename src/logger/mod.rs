//! Log Sink: human-oriented line log with age-based rotation (spec §4.8).

pub mod sink;
