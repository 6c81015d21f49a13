//! Minder error taxonomy.
//!
//! Parsing and validation errors are recovered where the owner's command is
//! handled and reported back verbatim; runtime firing errors are contained
//! per-job and logged, never propagated across jobs.

use thiserror::Error;

/// All errors produced inside the Minder workspace.
#[derive(Debug, Error)]
pub enum MinderError {
    /// Configuration file missing/unreadable/invalid.
    #[error("config error: {0}")]
    Config(String),

    /// SQLite storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Channel/transport failure (Telegram API, network).
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed schedule grammar string. Surfaced to the owner with
    /// guidance; never logged as a system fault.
    #[error("schedule error: {0}")]
    Schedule(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MinderError>;
