//! Remediation scripts
//!
//! Each profile carries a fixed, ordered list of SQL scripts under the
//! script root. Every script is contractually idempotent (CREATE IF NOT
//! EXISTS / CREATE OR REPLACE), so re-applying the whole list after a
//! partial failure is always safe.

use std::path::{Path, PathBuf};

use tokio_postgres::Client;

use crate::error::{ConformanceError, ConformanceResult};
use crate::inventory::manifest::Profile;

/// Environment variable overriding the script root location.
pub const SCRIPT_ROOT_ENV: &str = "CALLGRES_SCRIPTS";

const DEFAULT_SCRIPT_ROOT: &str = "db/scripts";

/// One ordered remediation step.
///
/// `touches_fdw` marks scripts that define or reference the foreign server
/// back to central; applying one triggers federation reconciliation on
/// plant profiles.
#[derive(Debug, Clone, Copy)]
pub struct RemediationStep {
    pub file: &'static str,
    pub touches_fdw: bool,
}

const CENTRAL_STEPS: &[RemediationStep] = &[
    RemediationStep {
        file: "0001_schema.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0002_tables.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0003_routines.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0004_triggers.sql",
        touches_fdw: false,
    },
];

const PLANT_STEPS: &[RemediationStep] = &[
    RemediationStep {
        file: "0001_schema.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0002_tables.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0003_routines.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0004_triggers.sql",
        touches_fdw: false,
    },
    RemediationStep {
        file: "0005_central_link.sql",
        touches_fdw: true,
    },
];

/// The fixed script order for a profile.
pub fn steps_for(profile: Profile) -> &'static [RemediationStep] {
    match profile {
        Profile::Central => CENTRAL_STEPS,
        Profile::PlantA | Profile::PlantB => PLANT_STEPS,
    }
}

/// Locate the script root: explicit setting, then the `CALLGRES_SCRIPTS`
/// environment variable, then `db/scripts` under the working directory.
pub fn resolve_script_root(configured: Option<&Path>) -> ConformanceResult<PathBuf> {
    let mut tried = Vec::new();

    if let Some(path) = configured {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        tried.push(path.display().to_string());
    }

    if let Ok(env_root) = std::env::var(SCRIPT_ROOT_ENV) {
        let path = PathBuf::from(env_root);
        if path.is_dir() {
            return Ok(path);
        }
        tried.push(path.display().to_string());
    }

    let default = PathBuf::from(DEFAULT_SCRIPT_ROOT);
    if default.is_dir() {
        return Ok(default);
    }
    tried.push(default.display().to_string());

    Err(ConformanceError::ScriptRoot(tried.join(", ")))
}

/// Apply one script file against the target database.
pub async fn apply_step(
    client: &Client,
    root: &Path,
    profile: Profile,
    step: &RemediationStep,
) -> ConformanceResult<()> {
    let path = root.join(profile.script_dir()).join(step.file);
    let sql = std::fs::read_to_string(&path).map_err(|e| {
        ConformanceError::Inventory(format!("cannot read script {}: {}", path.display(), e))
    })?;

    tracing::info!(script = %path.display(), "applying remediation script");
    client
        .batch_execute(&sql)
        .await
        .map_err(|e| ConformanceError::Inventory(format!("script {} failed: {}", step.file, e)))
}
