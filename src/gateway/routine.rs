//! Routine metadata resolution
//!
//! Looks up a routine's calling convention in the backend catalog: function
//! or procedure, set-returning or scalar, and the declared return type name.
//! Results are cached per gateway keyed by `(schema, name)` unless caching
//! is disabled in settings.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_postgres::Client;

use crate::error::{GatewayError, GatewayResult};

/// Whether the catalog entry is a plain function or a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

/// Resolved calling convention of one catalog routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineMetadata {
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,
    pub returns_set: bool,
    pub return_type: String,
}

impl RoutineMetadata {
    pub fn is_procedure(&self) -> bool {
        self.kind == RoutineKind::Procedure
    }

    /// Functions declared to return json/jsonb take the scalar-text
    /// invocation shape.
    pub fn returns_json(&self) -> bool {
        matches!(self.return_type.as_str(), "json" | "jsonb")
    }
}

/// Overloads resolve to the most recently defined entry.
const ROUTINE_LOOKUP_SQL: &str = "SELECT p.prokind::text AS kind, \
            p.proretset AS returns_set, \
            t.typname::text AS return_type \
     FROM pg_catalog.pg_proc p \
     JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
     JOIN pg_catalog.pg_type t ON t.oid = p.prorettype \
     WHERE n.nspname = $1 AND p.proname = $2 AND p.prokind IN ('f', 'p') \
     ORDER BY p.oid DESC \
     LIMIT 1";

fn metadata_from_parts(
    schema: &str,
    name: &str,
    kind_code: &str,
    returns_set: bool,
    return_type: String,
) -> RoutineMetadata {
    let kind = if kind_code == "p" {
        RoutineKind::Procedure
    } else {
        RoutineKind::Function
    };
    RoutineMetadata {
        schema: schema.to_string(),
        name: name.to_string(),
        kind,
        returns_set,
        return_type,
    }
}

/// Resolver with an optional concurrent cache. Concurrent misses may both
/// query the catalog; the duplicate insert writes the same value, so last
/// write wins harmlessly.
pub(crate) struct RoutineResolver {
    cache: RwLock<HashMap<(String, String), RoutineMetadata>>,
    cache_enabled: bool,
}

impl RoutineResolver {
    pub(crate) fn new(cache_enabled: bool) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            cache_enabled,
        }
    }

    pub(crate) async fn resolve(
        &self,
        client: &Client,
        schema: &str,
        name: &str,
    ) -> GatewayResult<RoutineMetadata> {
        let key = (schema.to_string(), name.to_string());
        if self.cache_enabled {
            if let Some(meta) = self.cache.read().await.get(&key) {
                return Ok(meta.clone());
            }
        }

        let meta = lookup(client, schema, name).await?;

        if self.cache_enabled {
            self.cache.write().await.insert(key, meta.clone());
        }
        Ok(meta)
    }
}

async fn lookup(client: &Client, schema: &str, name: &str) -> GatewayResult<RoutineMetadata> {
    let rows = client
        .query(ROUTINE_LOOKUP_SQL, &[&schema, &name])
        .await
        .map_err(GatewayError::from_backend)?;

    let row = rows.first().ok_or_else(|| GatewayError::RoutineNotFound {
        schema: schema.to_string(),
        name: name.to_string(),
    })?;

    let kind_code: String = row.try_get("kind").map_err(GatewayError::from_backend)?;
    let returns_set: bool = row
        .try_get("returns_set")
        .map_err(GatewayError::from_backend)?;
    let return_type: String = row
        .try_get("return_type")
        .map_err(GatewayError::from_backend)?;

    Ok(metadata_from_parts(
        schema,
        name,
        &kind_code,
        returns_set,
        return_type,
    ))
}
