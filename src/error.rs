//! Error types for the metrics collector
//!
//! Only configuration and startup errors are fatal. Everything raised while a
//! trial is being watched is logged by the collector and the session carries on.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Metrics collector error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed numeric value or timestamp
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Stopping rule could not be built from its configuration
    #[error("Invalid early stopping rule: {0}\nExpected format: <metric>;<value>;<equal|less|greater>;<start step>")]
    InvalidRule(String),

    /// Invalid configuration or argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Process lookup, termination or supervision failed
    #[error("Process error: {0}")]
    Process(String),

    /// RPC dial or call failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Observation store failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A bounded wait elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
