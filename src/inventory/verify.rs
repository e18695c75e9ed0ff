//! Conformance verification and remediation
//!
//! Diffs an inventory snapshot against a profile manifest. When objects are
//! missing or signatures disagree, one remediation pass applies the
//! profile's ordered scripts (per-step failures are logged and skipped, the
//! scripts are idempotent) and the snapshot is force-reloaded for a final
//! diff. Plant profiles additionally get their foreign server back to
//! central reconciled whenever an FDW-touching script ran.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tokio_postgres::Client;

use crate::config::ConnectionConfig;
use crate::error::{ConformanceError, ConformanceResult};
use crate::inventory::inspector::{InventorySnapshot, SchemaInspector};
use crate::inventory::manifest::{
    DbObjectRequirement, ObjectType, Profile, manifest_for, signatures_match,
};
use crate::inventory::scripts::{apply_step, resolve_script_root, steps_for};

/// Name of the foreign server plant databases use to reach central.
pub const FOREIGN_SERVER: &str = "central_link";

/// Outcome of verifying one database against its profile manifest.
#[derive(Debug, Clone)]
pub struct InventoryVerification {
    pub success: bool,
    pub error_message: Option<String>,
}

impl InventoryVerification {
    fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            error_message: Some(message),
        }
    }
}

/// What a snapshot lacks relative to a manifest.
#[derive(Debug, Default)]
pub struct ConformanceDiff {
    /// `"<type> <schema.name>"` per absent object, manifest order.
    pub missing: Vec<String>,
    /// `"<name>: expected (<sig>), actual (<sig>)"` per signature conflict.
    pub mismatches: Vec<String>,
}

impl ConformanceDiff {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.mismatches.is_empty()
    }
}

fn check_requirement(
    snapshot: &InventorySnapshot,
    req: &DbObjectRequirement,
    diff: &mut ConformanceDiff,
) {
    let actual_sig = match req.object_type {
        ObjectType::Function => snapshot.functions.get(req.name),
        ObjectType::Procedure => snapshot.procedures.get(req.name),
        ObjectType::Table => {
            if !snapshot.has_table(req.name) {
                diff.missing
                    .push(format!("{} {}", req.object_type.as_str(), req.name));
            }
            return;
        }
        ObjectType::Trigger => {
            if !snapshot.has_trigger(req.name) {
                diff.missing
                    .push(format!("{} {}", req.object_type.as_str(), req.name));
            }
            return;
        }
    };

    let Some(actual) = actual_sig else {
        diff.missing
            .push(format!("{} {}", req.object_type.as_str(), req.name));
        return;
    };

    if let Some(expected) = req.signature {
        if !signatures_match(expected, actual) {
            diff.mismatches.push(format!(
                "{}: expected ({}), actual ({})",
                req.name, expected, actual
            ));
        }
    }
}

/// Diff a snapshot against a requirement list.
pub fn diff_snapshot(
    snapshot: &InventorySnapshot,
    manifest: &[DbObjectRequirement],
) -> ConformanceDiff {
    let mut diff = ConformanceDiff::default();
    for req in manifest {
        check_requirement(snapshot, req, &mut diff);
    }
    diff
}

/// Render a failed diff as one operator-facing message.
pub fn format_failure(diff: &ConformanceDiff) -> String {
    let mut parts = Vec::new();
    if !diff.missing.is_empty() {
        let listed = diff
            .missing
            .iter()
            .enumerate()
            .map(|(i, m)| format!("  {}. {}", i + 1, m))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("Missing required DB objects:\n{}", listed));
    }
    if !diff.mismatches.is_empty() {
        parts.push(format!(
            "Signature mismatches: {}",
            diff.mismatches.join("; ")
        ));
    }
    parts.join("\n")
}

/// Verifies one database against its profile manifest, remediating once.
pub struct ConformanceChecker {
    profile: Profile,
    script_root: Option<PathBuf>,
    central: Option<ConnectionConfig>,
}

impl ConformanceChecker {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            script_root: None,
            central: None,
        }
    }

    /// Override the remediation script root (otherwise resolved via the
    /// `CALLGRES_SCRIPTS` environment variable or `db/scripts`).
    pub fn with_script_root(mut self, root: PathBuf) -> Self {
        self.script_root = Some(root);
        self
    }

    /// Connection details for the central database, used to reconcile plant
    /// federation wiring.
    pub fn with_central(mut self, central: ConnectionConfig) -> Self {
        self.central = Some(central);
        self
    }

    /// Verify the inspected database, attempting remediation once when the
    /// first diff is dirty.
    pub async fn verify(
        &self,
        inspector: &mut SchemaInspector,
    ) -> ConformanceResult<InventoryVerification> {
        let manifest = manifest_for(self.profile);
        let diff = diff_snapshot(inspector.snapshot().await?, manifest);
        if diff.is_clean() {
            return Ok(InventoryVerification::ok());
        }

        tracing::info!(
            profile = %self.profile,
            missing = diff.missing.len(),
            mismatches = diff.mismatches.len(),
            "conformance gaps found; attempting remediation"
        );

        let root = match resolve_script_root(self.script_root.as_deref()) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!("remediation skipped: {}", e);
                return Ok(InventoryVerification::failed(format_failure(&diff)));
            }
        };

        self.remediate(inspector.client(), &root).await;

        let diff = diff_snapshot(inspector.reload().await?, manifest);
        if diff.is_clean() {
            Ok(InventoryVerification::ok())
        } else {
            Ok(InventoryVerification::failed(format_failure(&diff)))
        }
    }

    /// Apply the profile's scripts in order. Individual failures are logged
    /// and skipped so a broken early step never blocks later idempotent
    /// ones; the re-diff afterwards decides whether it mattered.
    async fn remediate(&self, client: &Client, root: &std::path::Path) {
        for step in steps_for(self.profile) {
            if let Err(e) = apply_step(client, root, self.profile, step).await {
                tracing::warn!(script = step.file, "remediation step failed: {}", e);
                continue;
            }
            if step.touches_fdw && self.profile.is_plant() {
                match &self.central {
                    Some(central) => {
                        if let Err(e) = reconcile_federation(client, central).await {
                            tracing::warn!("federation reconciliation failed: {}", e);
                        }
                    }
                    None => {
                        tracing::warn!(
                            "script {} touches the foreign server but no central \
                             connection is configured; skipping reconciliation",
                            step.file
                        );
                    }
                }
            }
        }
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Keys present in a `pg_foreign_server.srvoptions` array (`key=value`
/// entries).
fn option_keys(options: &[String]) -> BTreeSet<String> {
    options
        .iter()
        .filter_map(|o| o.split_once('=').map(|(k, _)| k.to_string()))
        .collect()
}

/// Align the plant's foreign server and the current user's mapping with the
/// central connection details.
///
/// Server options are altered unconditionally (`ADD` for options the server
/// does not carry yet, `SET` for ones it does); the user mapping is created
/// only when absent.
pub async fn reconcile_federation(
    client: &Client,
    central: &ConnectionConfig,
) -> ConformanceResult<()> {
    let map_err = |e: tokio_postgres::Error| ConformanceError::Federation(e.to_string());

    let row = client
        .query_opt(
            "SELECT srvoptions FROM pg_foreign_server WHERE srvname = $1",
            &[&FOREIGN_SERVER],
        )
        .await
        .map_err(map_err)?
        .ok_or_else(|| {
            ConformanceError::Federation(format!("foreign server {} not defined", FOREIGN_SERVER))
        })?;

    let options: Option<Vec<String>> = row.get(0);
    let existing = option_keys(options.as_deref().unwrap_or_default());

    let port = central.port.to_string();
    let desired = [
        ("host", central.host.as_str()),
        ("port", port.as_str()),
        ("dbname", central.database.as_str()),
    ];
    let clauses = desired
        .iter()
        .map(|(key, value)| {
            let verb = if existing.contains(*key) { "SET" } else { "ADD" };
            format!("{} {} {}", verb, key, quote_literal(value))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let alter = format!("ALTER SERVER {} OPTIONS ({})", FOREIGN_SERVER, clauses);
    tracing::info!(statement = %alter, "reconciling foreign server options");
    client.batch_execute(&alter).await.map_err(map_err)?;

    let mapped = client
        .query_opt(
            "SELECT 1 FROM pg_user_mappings \
             WHERE srvname = $1 AND usename = current_user",
            &[&FOREIGN_SERVER],
        )
        .await
        .map_err(map_err)?;

    if mapped.is_none() {
        let create = format!(
            "CREATE USER MAPPING FOR CURRENT USER SERVER {} OPTIONS (user {}, password {})",
            FOREIGN_SERVER,
            quote_literal(&central.username),
            quote_literal(central.password.as_deref().unwrap_or_default()),
        );
        tracing::info!("creating user mapping for foreign server {}", FOREIGN_SERVER);
        client.batch_execute(&create).await.map_err(map_err)?;
    }

    Ok(())
}
