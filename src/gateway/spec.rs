//! Operation specs
//!
//! `Query` and `Command` each describe one routine invocation: the logical
//! operation name, the ordered named parameters, and an optional per-call
//! timeout override. Specs are built once and stay immutable afterwards.

use std::time::Duration;

use crate::db::SqlValue;
use crate::error::{GatewayError, GatewayResult};

/// Spec for a result-producing invocation.
#[derive(Debug, Clone)]
pub struct Query {
    operation: String,
    params: Vec<(String, SqlValue)>,
    timeout: Option<Duration>,
}

impl Query {
    /// Create a spec for `operation`, either `"schema.routine"` or a bare
    /// routine name resolved against the configured default schema.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    /// Append a named parameter. Order defines placeholder numbering.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Override the configured command timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params(&self) -> &[(String, SqlValue)] {
        &self.params
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Spec for a side-effecting invocation.
#[derive(Debug, Clone)]
pub struct Command {
    operation: String,
    params: Vec<(String, SqlValue)>,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    /// Append a named parameter. Order defines placeholder numbering.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Override the configured command timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params(&self) -> &[(String, SqlValue)] {
        &self.params
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Split an operation name into schema and routine parts.
///
/// No dot applies the default schema; exactly one dot splits into the two
/// parts verbatim. Anything else (empty name, empty part, nested dots) is a
/// spec error and never reaches the backend.
pub(crate) fn split_operation(
    operation: &str,
    default_schema: &str,
) -> GatewayResult<(String, String)> {
    let trimmed = operation.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Spec("operation name is empty".to_string()));
    }

    let mut parts = trimmed.split('.');
    let first = parts.next().unwrap_or_default();
    match (parts.next(), parts.next()) {
        (None, _) => Ok((default_schema.to_string(), first.to_string())),
        (Some(second), None) => {
            if first.is_empty() || second.is_empty() {
                return Err(GatewayError::Spec(format!(
                    "operation name '{}' has an empty schema or routine part",
                    trimmed
                )));
            }
            Ok((first.to_string(), second.to_string()))
        }
        (Some(_), Some(_)) => Err(GatewayError::Spec(format!(
            "operation name '{}' has more than one dot",
            trimmed
        ))),
    }
}
