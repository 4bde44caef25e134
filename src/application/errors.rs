//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Plugin lifecycle and runtime errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// A bad or missing manifest field, a bad schema script, or a duplicate
    /// identifier. Aborts only the affected plugin's load.
    #[error("{0}")]
    Validation(String),

    /// Entry module resolution or setup failed.
    #[error("failed to load {plugin}: {reason}")]
    Setup { plugin: String, reason: String },

    /// A contract violation by plugin code (double injection, ejecting an
    /// absent injection). Raised synchronously back to the caller.
    #[error("{0}")]
    Configuration(String),

    /// A listener or command raised; logged per plugin, never propagated
    /// to sibling plugins.
    #[error("listener error: {0}")]
    Listener(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Remote transfer errors: hub failures and malformed archives. Translated
/// into readable strings at the command surface, never a crash.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message} ({status})")]
    Status { status: u16, message: String },

    #[error("{0}")]
    InvalidArchive(String),

    #[error("{0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
