//! Error types for pgbridge
//!
//! This module defines the error hierarchy used throughout the crate.
//! We use `thiserror` for library-style errors with clear error chains.
//!
//! There are two layers:
//! - [`ClientError`] is raised by the underlying database client
//!   (the PostgreSQL backend or any other [`crate::db::DatabaseClient`]).
//! - [`ServiceError`] is what callers of the service layer see. Exactly two
//!   client signals are translated into dedicated kinds, everything else is
//!   passed through.

use std::io;

/// Top-level error type used by bootstrap helpers
#[derive(Debug, thiserror::Error)]
pub enum PgBridgeError {
    /// Service layer errors
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the service layer (registry, handles, bridge)
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Invalid or missing identifiers, or a project mismatch.
    /// Raised synchronously at construction time, never through a future.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The pool could not hand out a session within its wait policy
    #[error("No database session available within the configured wait time")]
    SessionUnavailable(#[source] ClientError),

    /// A read-write transaction kept aborting until the client gave up
    #[error("Transaction aborted after exhausting the client's retry budget")]
    TransactionTimeout(#[source] ClientError),

    /// Any other client or application error, unchanged
    #[error(transparent)]
    Client(ClientError),

    /// The operation was cancelled before its result was delivered
    #[error("Operation cancelled")]
    Cancelled,

    /// The handle, registry or bridge has been shut down
    #[error("Service is closed")]
    Closed,

    /// Failed to start the blocking executor
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the underlying database client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No pooled session became available in time
    #[error("Session queue empty: {0}")]
    SessionQueueEmpty(String),

    /// The operation was aborted (contention, serialization failure)
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// Named instance or database does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failed to establish or configure a connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Error reported by PostgreSQL or the driver
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Application error raised from inside a consumer
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    /// Wrap an arbitrary application error so it can be returned from a
    /// snapshot or transaction consumer.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ClientError::Other(err.into())
    }
}

/// Configuration loading/parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Config file not found
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Failed to read a configuration file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Specialized Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, PgBridgeError>;

/// Specialized Result type for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Specialized Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Specialized Result type for config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
