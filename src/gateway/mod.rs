//! Routine dispatch gateway
//!
//! The public face of the dispatch engine. A [`Gateway`] resolves logical
//! operation names against the backend catalog, marshals named parameters,
//! builds the invocation, executes it (inside an ambient transaction scope
//! when one is supplied) and shapes results into the caller's requested
//! type. One gateway per connection profile; it is cheap to share behind a
//! reference.

pub mod command;
pub mod notify;
pub mod params;
pub mod routine;
pub mod spec;
pub mod transaction;

pub use notify::{Notification, NotificationHub};
pub use params::default_json_hint;
pub use routine::{RoutineKind, RoutineMetadata};
pub use spec::{Command, Query};
pub use transaction::{CallContext, TransactionScope};

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use tokio::time::timeout;
use tokio_postgres::Client;
use tokio_postgres::types::ToSql;

use crate::config::{ConnectionConfig, GatewaySettings};
use crate::db::connect::OpenClient;
use crate::db::types::{FromSqlRow, SqlRow, SqlValue, row_from_pg, value_from_pg};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::command::build_invocation;
use crate::gateway::params::{BoundParam, JsonHintPredicate, marshal_params};
use crate::gateway::routine::RoutineResolver;
use crate::gateway::spec::split_operation;

pub struct Gateway {
    config: ConnectionConfig,
    settings: GatewaySettings,
    resolver: RoutineResolver,
    json_hint: JsonHintPredicate,
    hub: NotificationHub,
}

impl Gateway {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_settings(config, GatewaySettings::default())
    }

    pub fn with_settings(config: ConnectionConfig, settings: GatewaySettings) -> Self {
        let resolver = RoutineResolver::new(!settings.disable_routine_cache);
        let hub = NotificationHub::new(config.clone());
        Self {
            config,
            settings,
            resolver,
            json_hint: Arc::new(default_json_hint),
            hub,
        }
    }

    /// Replace the JSON-hint predicate consulted by the marshaler.
    pub fn with_json_predicate(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.json_hint = Arc::new(predicate);
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub(crate) fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The LISTEN/NOTIFY hub bound to this gateway's connection profile.
    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    fn effective_timeout(&self, overridden: Option<Duration>) -> Duration {
        overridden.unwrap_or_else(|| self.settings.command_timeout())
    }

    /// Execute a result-producing operation and shape every row into `T`.
    ///
    /// Set-returning functions drain all rows; json-returning functions
    /// yield zero or one element (empty on NULL or blank); procedures yield
    /// an empty list. With `tx` the call runs on the scope's dedicated
    /// connection, otherwise on a short-lived one opened for this call.
    pub async fn execute_query<T: FromSqlRow>(
        &self,
        spec: &Query,
        tx: Option<&TransactionScope>,
    ) -> GatewayResult<Vec<T>> {
        let budget = self.effective_timeout(spec.timeout_override());
        let (schema, name) = split_operation(spec.operation(), &self.settings.default_schema)?;
        let bound = marshal_params(spec.params(), &self.json_hint)?;

        match tx {
            Some(scope) => {
                scope.ensure_active()?;
                let handle = scope.handle();
                match timeout(
                    budget,
                    self.query_rows::<T>(&handle.client, &schema, &name, &bound),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        handle.spawn_cancel();
                        Err(cancelled(budget))
                    }
                }
            }
            None => {
                let started = Instant::now();
                let open = match timeout(budget, OpenClient::open(&self.config)).await {
                    Ok(opened) => opened?,
                    Err(_) => return Err(cancelled(budget)),
                };
                let remaining = budget.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(cancelled(budget));
                }
                match timeout(
                    remaining,
                    self.query_rows::<T>(&open.client, &schema, &name, &bound),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        open.spawn_cancel();
                        Err(cancelled(budget))
                    }
                }
            }
        }
    }

    /// Execute a side-effecting operation and report the affected-row count.
    ///
    /// Procedures report the backend count (zero when the backend does not
    /// say). Functions run as scalar executions: a numeric result is the
    /// count (floored at zero), anything else is `1` for plain success.
    pub async fn execute_command(
        &self,
        spec: &Command,
        tx: Option<&TransactionScope>,
    ) -> GatewayResult<u64> {
        let budget = self.effective_timeout(spec.timeout_override());
        let (schema, name) = split_operation(spec.operation(), &self.settings.default_schema)?;
        let bound = marshal_params(spec.params(), &self.json_hint)?;

        match tx {
            Some(scope) => {
                scope.ensure_active()?;
                let handle = scope.handle();
                match timeout(
                    budget,
                    self.command_effect(&handle.client, &schema, &name, &bound),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        handle.spawn_cancel();
                        Err(cancelled(budget))
                    }
                }
            }
            None => {
                let started = Instant::now();
                let open = match timeout(budget, OpenClient::open(&self.config)).await {
                    Ok(opened) => opened?,
                    Err(_) => return Err(cancelled(budget)),
                };
                let remaining = budget.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(cancelled(budget));
                }
                match timeout(
                    remaining,
                    self.command_effect(&open.client, &schema, &name, &bound),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        open.spawn_cancel();
                        Err(cancelled(budget))
                    }
                }
            }
        }
    }

    async fn query_rows<T: FromSqlRow>(
        &self,
        client: &Client,
        schema: &str,
        name: &str,
        bound: &[BoundParam],
    ) -> GatewayResult<Vec<T>> {
        let meta = self.resolver.resolve(client, schema, name).await?;
        let text = build_invocation(&meta, bound);
        tracing::debug!(command = %text, "dispatching query");

        let stmt = client
            .prepare(&text)
            .await
            .map_err(GatewayError::from_backend)?;
        let args: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| &p.value as &(dyn ToSql + Sync))
            .collect();
        let rows = client
            .query(&stmt, &args)
            .await
            .map_err(GatewayError::from_backend)?;

        if meta.is_procedure() {
            return Ok(Vec::new());
        }

        if meta.returns_json() {
            let Some(first) = rows.first() else {
                return Ok(Vec::new());
            };
            let scalar: Option<String> = first.try_get(0).map_err(GatewayError::from_backend)?;
            return match scalar {
                None => Ok(Vec::new()),
                Some(text_value) if text_value.trim().is_empty() => Ok(Vec::new()),
                Some(text_value) => {
                    let column = stmt
                        .columns()
                        .first()
                        .map(|c| c.name().to_string())
                        .unwrap_or_else(|| "value".to_string());
                    let row = SqlRow::new(vec![column], vec![SqlValue::Text(text_value)]);
                    Ok(vec![T::from_row(row)?])
                }
            };
        }

        let columns: Arc<[String]> = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>()
            .into();
        let mut shaped = Vec::with_capacity(rows.len());
        for row in &rows {
            shaped.push(T::from_row(row_from_pg(row, &columns)?)?);
        }
        Ok(shaped)
    }

    async fn command_effect(
        &self,
        client: &Client,
        schema: &str,
        name: &str,
        bound: &[BoundParam],
    ) -> GatewayResult<u64> {
        let meta = self.resolver.resolve(client, schema, name).await?;
        let text = build_invocation(&meta, bound);
        tracing::debug!(command = %text, "dispatching command");

        let stmt = client
            .prepare(&text)
            .await
            .map_err(GatewayError::from_backend)?;
        let args: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| &p.value as &(dyn ToSql + Sync))
            .collect();

        if meta.is_procedure() {
            return client
                .execute(&stmt, &args)
                .await
                .map_err(GatewayError::from_backend);
        }

        let rows = client
            .query(&stmt, &args)
            .await
            .map_err(GatewayError::from_backend)?;
        let Some(first) = rows.first() else {
            return Ok(1);
        };
        if first.is_empty() {
            return Ok(1);
        }
        match value_from_pg(first, 0) {
            Ok(SqlValue::Int(n)) => Ok(n.max(0) as u64),
            Ok(SqlValue::Decimal(d)) => Ok(d.to_i64().map(|n| n.max(0) as u64).unwrap_or(1)),
            _ => Ok(1),
        }
    }
}

fn cancelled(budget: Duration) -> GatewayError {
    GatewayError::Cancelled(format!("timed out after {:?}", budget))
}
