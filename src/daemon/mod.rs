//! Daemon subsystem: the Supervisor's startup sequence, main loop, signal
//! handling, and graceful shutdown (spec §4.10).

pub mod signals;
pub mod supervisor;
