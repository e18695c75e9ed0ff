//! Error types for callgres
//!
//! This module defines the error hierarchy used throughout the gateway.
//! We use `thiserror` for library-style errors with clear error chains.
//!
//! Call-path failures carry enough structure (kind plus the backend's
//! original SQLSTATE and message) for the caller to decide on retry;
//! nothing here retries automatically.

use std::io;

/// Main error type for the callgres library
#[derive(Debug, thiserror::Error)]
pub enum CallgresError {
    /// Routine dispatch errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema conformance errors
    #[error("Conformance error: {0}")]
    Conformance(#[from] ConformanceError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Routine dispatch and execution errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed operation spec; detected before any backend round-trip
    #[error("Invalid operation spec: {0}")]
    Spec(String),

    /// No routine with the requested name exists in the catalog
    #[error("Routine not found: {schema}.{name}")]
    RoutineNotFound { schema: String, name: String },

    /// A parameter value could not be marshaled
    #[error("Parameter marshaling failed for '{name}': {reason}")]
    Marshal { name: String, reason: String },

    /// The produced row/scalar type does not match the caller's requested type
    #[error("Cast mismatch: produced {produced}, requested {requested}")]
    CastMismatch {
        produced: String,
        requested: &'static str,
    },

    /// Backend-reported error with the native code and message preserved
    #[error("Backend error {code}: {message}")]
    Backend { code: String, message: String },

    /// The operation was cancelled or timed out before completing
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A second transaction scope was requested while one is active
    #[error("A transaction scope is already active in this call context")]
    TransactionAlreadyActive,

    /// Failed to establish a connection
    #[error("Connection failed: {0}")]
    Connection(String),
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

    /// Connection profile not found
    #[error("Connection profile '{0}' not found")]
    ProfileNotFound(String),
}

/// Schema inventory and remediation infrastructure errors
///
/// Verification *outcomes* (missing objects, signature mismatches) are data,
/// reported via [`crate::inventory::InventoryVerification`]; these variants
/// cover failures of the machinery itself.
#[derive(Debug, thiserror::Error)]
pub enum ConformanceError {
    /// A catalog enumeration query failed
    #[error("Inventory query failed: {0}")]
    Inventory(String),

    /// The remediation script root could not be resolved
    #[error("Remediation script root not found (tried: {0})")]
    ScriptRoot(String),

    /// Federation wiring could not be reconciled
    #[error("Foreign server reconciliation failed: {0}")]
    Federation(String),
}

/// Specialized Result type for callgres operations
pub type Result<T> = std::result::Result<T, CallgresError>;

/// Specialized Result type for routine dispatch operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Specialized Result type for config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized Result type for conformance operations
pub type ConformanceResult<T> = std::result::Result<T, ConformanceError>;

impl GatewayError {
    /// Wrap a tokio-postgres error, preserving the backend's SQLSTATE and
    /// message when the failure originated server-side.
    pub fn from_backend(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            GatewayError::Backend {
                code: db.code().code().to_string(),
                message: db.message().to_string(),
            }
        } else if err.is_closed() {
            GatewayError::Connection(err.to_string())
        } else {
            GatewayError::Backend {
                code: "XX000".to_string(),
                message: err.to_string(),
            }
        }
    }
}
