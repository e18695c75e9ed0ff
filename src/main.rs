//! callgres - conformance check entry point
//!
//! Verifies a target database against its deployment-profile manifest,
//! remediating gaps from the profile's script directory, and reports the
//! outcome. Intended to run at application startup or from CI before the
//! routine gateway is put in front of traffic.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use callgres::config::{
    ConnectionConfig, find_connection, find_connection_for_profile, load_settings,
};
use callgres::inventory::{ConformanceChecker, Profile, SchemaInspector};

#[derive(Parser)]
#[command(name = "callgres", version, about = "Verify a database against its profile manifest")]
struct Args {
    /// Deployment profile to verify against (central, plant-a, plant-b)
    #[arg(short, long)]
    profile: Profile,

    /// Connection URL of the target database (postgres://...)
    #[arg(short, long)]
    url: Option<String>,

    /// Named connection profile from ~/.callgres/connections.toml
    #[arg(short, long, conflicts_with = "url")]
    connection: Option<String>,

    /// Connection URL of the central database, for plant federation wiring
    #[arg(long)]
    central_url: Option<String>,

    /// Remediation script root (overrides settings and CALLGRES_SCRIPTS)
    #[arg(long)]
    scripts: Option<PathBuf>,
}

/// Explicit URL, then named entry, then the entry pinned to the profile.
fn target_config(args: &Args) -> Result<ConnectionConfig> {
    if let Some(url) = &args.url {
        return ConnectionConfig::from_url(url).context("invalid connection URL");
    }
    if let Some(name) = &args.connection {
        return find_connection(name).context("connection lookup failed");
    }
    find_connection_for_profile(args.profile.as_str()).with_context(|| {
        format!(
            "no --url or --connection given and no entry is pinned to profile '{}'",
            args.profile
        )
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let settings = load_settings().context("failed to load settings")?;
    let config = target_config(&args)?;

    let mut checker = ConformanceChecker::new(args.profile);
    if let Some(root) = args.scripts.clone().or_else(|| settings.script_root.clone()) {
        checker = checker.with_script_root(root);
    }
    if let Some(central_url) = &args.central_url {
        let central = ConnectionConfig::from_url(central_url).context("invalid central URL")?;
        checker = checker.with_central(central);
    }

    let mut inspector = SchemaInspector::connect(&config)
        .await
        .with_context(|| format!("cannot connect to {}:{}", config.host, config.port))?;
    let verification = checker.verify(&mut inspector).await?;

    if verification.success {
        println!("{}: database conforms to the {} manifest", config.database, args.profile);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{}: conformance check failed\n{}",
            config.database,
            verification.error_message.as_deref().unwrap_or("unknown failure")
        );
        Ok(ExitCode::FAILURE)
    }
}
