//! Error handling module
//!
//! Provides the unified error type for every command. Fatal errors carry enough
//! context (failing invocation, captured diagnostics) to be reported once and
//! terminate the command. Per-table read failures never reach this type: the
//! fingerprint engine degrades them to a sentinel digest instead.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum DblError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed internal command.\n   Cmd: {command}\n   Err: {diagnostics}")]
    Engine {
        command: String,
        diagnostics: String,
    },

    #[error("Command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("Error inspecting schema of '{db}': {source}")]
    Fingerprint {
        db: String,
        #[source]
        source: Box<DblError>,
    },

    #[error("{0}")]
    Manifest(String),

    #[error("{0}")]
    SandboxState(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

impl DblError {
    /// Wrap an introspection failure as fatal for the fingerprinting pass
    pub fn fingerprint(db: impl Into<String>, source: DblError) -> Self {
        DblError::Fingerprint {
            db: db.into(),
            source: Box::new(source),
        }
    }
}

impl From<config::ConfigError> for DblError {
    fn from(err: config::ConfigError) -> Self {
        DblError::Config(err.to_string())
    }
}

/// Result type alias used across the crate
pub type DblResult<T> = Result<T, DblError>;

/// Helper function to create a manifest error (unknown branch or reference)
pub fn manifest_error(msg: impl Into<String>) -> DblError {
    DblError::Manifest(msg.into())
}

/// Helper function to create a sandbox state error
pub fn sandbox_error(msg: impl Into<String>) -> DblError {
    DblError::SandboxState(msg.into())
}

/// Helper function to create a configuration error
pub fn config_error(msg: impl Into<String>) -> DblError {
    DblError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_reports_command_and_diagnostics() {
        let err = DblError::Engine {
            command: "psql -d shop".to_string(),
            diagnostics: "relation \"users\" does not exist".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("psql -d shop"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_fingerprint_error_names_database() {
        let err = DblError::fingerprint("shop", config_error("boom"));
        assert!(err.to_string().contains("'shop'"));
    }
}
