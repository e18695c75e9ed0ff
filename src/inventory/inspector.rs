//! Schema inventory
//!
//! Snapshots what actually exists in a target database: every non-system
//! routine (split function vs. procedure, with its identity-argument
//! signature), every non-system base table, and every non-internal trigger,
//! all recorded as fully qualified `schema.name` strings. The snapshot is
//! cached on the inspector; `reload` re-runs all three enumeration queries.

use std::collections::{BTreeMap, BTreeSet};

use tokio_postgres::Client;

use crate::config::ConnectionConfig;
use crate::db::connect::OpenClient;
use crate::error::{ConformanceError, ConformanceResult};

/// What one database contained at snapshot time.
///
/// Routines map fully qualified name to the identity-argument string the
/// catalog reports (empty for zero-argument routines); tables and triggers
/// are plain name sets.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub functions: BTreeMap<String, String>,
    pub procedures: BTreeMap<String, String>,
    pub tables: BTreeSet<String>,
    pub triggers: BTreeSet<String>,
}

impl InventorySnapshot {
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn has_procedure(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn has_trigger(&self, name: &str) -> bool {
        self.triggers.contains(name)
    }
}

const ROUTINES_SQL: &str = "SELECT n.nspname, p.proname, p.prokind::text, \
            pg_get_function_identity_arguments(p.oid) AS args \
     FROM pg_proc p \
     JOIN pg_namespace n ON n.oid = p.pronamespace \
     WHERE n.nspname NOT LIKE 'pg_%' \
       AND n.nspname != 'information_schema' \
       AND p.prokind IN ('f', 'p') \
     ORDER BY n.nspname, p.proname";

const TABLES_SQL: &str = "SELECT n.nspname, c.relname \
     FROM pg_class c \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE c.relkind = 'r' \
       AND n.nspname NOT LIKE 'pg_%' \
       AND n.nspname != 'information_schema' \
     ORDER BY n.nspname, c.relname";

const TRIGGERS_SQL: &str = "SELECT n.nspname, t.tgname \
     FROM pg_trigger t \
     JOIN pg_class c ON c.oid = t.tgrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE NOT t.tgisinternal \
       AND n.nspname NOT LIKE 'pg_%' \
       AND n.nspname != 'information_schema' \
     ORDER BY n.nspname, t.tgname";

/// Inventories one target database over a dedicated connection.
pub struct SchemaInspector {
    handle: OpenClient,
    snapshot: Option<InventorySnapshot>,
}

impl SchemaInspector {
    /// Open a dedicated connection to the target database.
    pub async fn connect(config: &ConnectionConfig) -> ConformanceResult<Self> {
        let handle = OpenClient::open(config)
            .await
            .map_err(|e| ConformanceError::Inventory(e.to_string()))?;
        Ok(Self {
            handle,
            snapshot: None,
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.handle.client
    }

    /// The cached snapshot, capturing it on first use.
    pub async fn snapshot(&mut self) -> ConformanceResult<&InventorySnapshot> {
        if self.snapshot.is_none() {
            self.snapshot = Some(capture(&self.handle.client).await?);
        }
        Ok(self.snapshot.as_ref().unwrap())
    }

    /// Discard the cache and re-run all enumeration queries.
    pub async fn reload(&mut self) -> ConformanceResult<&InventorySnapshot> {
        self.snapshot = Some(capture(&self.handle.client).await?);
        Ok(self.snapshot.as_ref().unwrap())
    }
}

async fn capture(client: &Client) -> ConformanceResult<InventorySnapshot> {
    let map_err = |e: tokio_postgres::Error| ConformanceError::Inventory(e.to_string());

    let mut snapshot = InventorySnapshot::default();

    let routine_rows = client.query(ROUTINES_SQL, &[]).await.map_err(map_err)?;
    for row in &routine_rows {
        let schema: String = row.get(0);
        let name: String = row.get(1);
        let kind: String = row.get(2);
        let args: String = row.get(3);
        let qualified = format!("{}.{}", schema, name);
        if kind == "p" {
            snapshot.procedures.insert(qualified, args);
        } else {
            snapshot.functions.insert(qualified, args);
        }
    }

    let table_rows = client.query(TABLES_SQL, &[]).await.map_err(map_err)?;
    for row in &table_rows {
        let schema: String = row.get(0);
        let name: String = row.get(1);
        snapshot.tables.insert(format!("{}.{}", schema, name));
    }

    let trigger_rows = client.query(TRIGGERS_SQL, &[]).await.map_err(map_err)?;
    for row in &trigger_rows {
        let schema: String = row.get(0);
        let name: String = row.get(1);
        snapshot.triggers.insert(format!("{}.{}", schema, name));
    }

    tracing::debug!(
        functions = snapshot.functions.len(),
        procedures = snapshot.procedures.len(),
        tables = snapshot.tables.len(),
        triggers = snapshot.triggers.len(),
        "captured inventory snapshot"
    );

    Ok(snapshot)
}
