//! Error types, one enum per layer.

use thiserror::Error;

/// Configuration resolution failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value '{key}'")]
    MissingValue { key: String },

    #[error("invalid configuration value '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence layer failures.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Mail delivery failures. The engine records these in the dispatch
/// history instead of propagating them out of a run.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("mailer misconfigured: {0}")]
    Config(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("smtp transport error: {0}")]
    Transport(String),
}

/// Notification engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("reminder profiles unavailable: {0}")]
    Profiles(String),

    #[error("template error: {0}")]
    Template(String),
}
