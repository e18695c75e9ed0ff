//! Common test utilities and helpers
//!
//! Shared fixtures for the integration tests: the test connection config,
//! the central-profile schema (applied from the shipped remediation scripts
//! so tests and scripts cannot drift apart), and deterministic seed data.

use callgres::config::ConnectionConfig;
use callgres::config::connections::SslMode;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

/// Tests share one database and reseed it; hold this across any test that
/// touches fixture data.
pub static DB_LOCK: Mutex<()> = Mutex::const_new(());

/// The central-profile remediation scripts, applied in their fixed order.
pub const CENTRAL_SCRIPTS: [&str; 4] = [
    include_str!("../../db/scripts/central/0001_schema.sql"),
    include_str!("../../db/scripts/central/0002_tables.sql"),
    include_str!("../../db/scripts/central/0003_routines.sql"),
    include_str!("../../db/scripts/central/0004_triggers.sql"),
];

/// Test-only routines: deterministic counters and a deliberately slow
/// function for cancellation tests.
const EXTRA_DDL: &str = "
CREATE OR REPLACE FUNCTION amdb.count_open_work_orders() RETURNS bigint
LANGUAGE sql STABLE AS $$
    SELECT count(*) FROM amdb.work_order WHERE status = 'open'
$$;

CREATE OR REPLACE FUNCTION amdb.count_readings(p_asset_id bigint) RETURNS bigint
LANGUAGE sql STABLE AS $$
    SELECT count(*) FROM amdb.sensor_reading WHERE asset_id = p_asset_id
$$;

CREATE OR REPLACE FUNCTION amdb.slow_count() RETURNS bigint
LANGUAGE plpgsql AS $$
BEGIN
    PERFORM pg_sleep(2);
    RETURN 3;
END;
$$;
";

/// Reset to two assets and three open work orders.
const SEED_SQL: &str = "
TRUNCATE amdb.audit_log, amdb.sensor_reading, amdb.work_order, amdb.asset
    RESTART IDENTITY CASCADE;
INSERT INTO amdb.asset (tag, name) VALUES
    ('P-101', 'Feed pump'),
    ('C-201', 'Compressor');
INSERT INTO amdb.work_order (asset_id, status) VALUES
    (1, 'open'), (1, 'open'), (2, 'open');
";

/// Number of open work orders after [`seed`].
pub const SEEDED_OPEN_WORK_ORDERS: usize = 3;

/// Get test database connection config
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        name: "integration-test".to_string(),
        profile: None,
        host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: std::env::var("TEST_DB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5433),
        database: std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "amdb_test".to_string()),
        username: std::env::var("TEST_DB_USER").unwrap_or_else(|_| "amdb".to_string()),
        password: Some(std::env::var("TEST_DB_PASSWORD").unwrap_or_else(|_| "amdb".to_string())),
        ssl_mode: SslMode::Disable,
    }
}

/// Open a raw client for fixture work, or `None` when the test database is
/// not running (tests skip gracefully).
pub async fn raw_client(config: &ConnectionConfig) -> Option<Client> {
    let conn_string = config.connection_string_with_password();
    match tokio_postgres::connect(&conn_string, NoTls).await {
        Ok((client, connection)) => {
            tokio::spawn(async move {
                let _ = connection.await;
            });
            Some(client)
        }
        Err(e) => {
            eprintln!(
                "Skipping test: database not available at {}:{} - {}",
                config.host, config.port, e
            );
            None
        }
    }
}

/// Apply schema scripts plus test-only routines, then seed.
pub async fn setup_fixture(client: &Client) {
    for script in CENTRAL_SCRIPTS {
        client
            .batch_execute(script)
            .await
            .expect("fixture script failed");
    }
    client
        .batch_execute(EXTRA_DDL)
        .await
        .expect("test DDL failed");
    seed(client).await;
}

/// Reset the data to the known seed state.
pub async fn seed(client: &Client) {
    client.batch_execute(SEED_SQL).await.expect("seed failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_creation() {
        let config = test_config();
        assert_eq!(config.name, "integration-test");
        assert_eq!(config.ssl_mode, SslMode::Disable);
    }

    #[test]
    fn test_scripts_are_ordered_and_nonempty() {
        assert!(CENTRAL_SCRIPTS.iter().all(|s| !s.trim().is_empty()));
    }
}
