//! Integration tests for the schema conformance engine
//!
//! These tests require the test PostgreSQL database to be running.
//! Start it with: docker-compose -f docker-compose.test.yml up -d

use std::path::PathBuf;

use callgres::inventory::{ConformanceChecker, Profile, SchemaInspector};

use crate::common;

fn script_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/scripts")
}

#[tokio::test]
async fn test_snapshot_classifies_fixture_objects() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };
    common::setup_fixture(&client).await;

    let mut inspector = SchemaInspector::connect(&config).await.unwrap();
    let snapshot = inspector.snapshot().await.unwrap();

    assert!(snapshot.has_function("amdb.list_open_work_orders"));
    assert!(snapshot.has_function("amdb.asset_health_summary"));
    assert!(snapshot.has_procedure("amdb.close_work_order"));
    assert!(!snapshot.has_function("amdb.close_work_order"));
    assert!(snapshot.has_table("amdb.asset"));
    assert!(snapshot.has_trigger("amdb.trg_asset_audit"));

    assert_eq!(
        snapshot.functions.get("amdb.get_asset_by_tag").map(String::as_str),
        Some("p_tag text")
    );
    assert_eq!(
        snapshot
            .procedures
            .get("amdb.record_sensor_reading")
            .map(String::as_str),
        Some("p_asset_id bigint, p_points_json jsonb")
    );
}

#[tokio::test]
async fn test_snapshot_is_cached_until_reload() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };
    common::setup_fixture(&client).await;

    let mut inspector = SchemaInspector::connect(&config).await.unwrap();
    inspector.snapshot().await.unwrap();

    client
        .batch_execute(
            "CREATE OR REPLACE FUNCTION amdb.tmp_probe() RETURNS bigint \
             LANGUAGE sql AS $$ SELECT 1::bigint $$",
        )
        .await
        .unwrap();

    assert!(!inspector.snapshot().await.unwrap().has_function("amdb.tmp_probe"));
    assert!(inspector.reload().await.unwrap().has_function("amdb.tmp_probe"));

    client
        .batch_execute("DROP FUNCTION amdb.tmp_probe()")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_verify_succeeds_on_conforming_database() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };
    common::setup_fixture(&client).await;

    let mut inspector = SchemaInspector::connect(&config).await.unwrap();
    let checker = ConformanceChecker::new(Profile::Central).with_script_root(script_root());
    let verification = checker.verify(&mut inspector).await.unwrap();

    assert!(
        verification.success,
        "unexpected failure: {:?}",
        verification.error_message
    );
    assert!(verification.error_message.is_none());
}

#[tokio::test]
async fn test_verify_remediates_dropped_objects() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };
    common::setup_fixture(&client).await;

    // Knock out one function and one trigger; the script pass must restore
    // both before the re-diff
    client
        .batch_execute(
            "DROP FUNCTION amdb.asset_health_summary(bigint); \
             DROP TRIGGER trg_work_order_touch ON amdb.work_order",
        )
        .await
        .unwrap();

    let mut inspector = SchemaInspector::connect(&config).await.unwrap();
    let checker = ConformanceChecker::new(Profile::Central).with_script_root(script_root());
    let verification = checker.verify(&mut inspector).await.unwrap();

    assert!(
        verification.success,
        "remediation did not converge: {:?}",
        verification.error_message
    );
    assert!(inspector.snapshot().await.unwrap().has_function("amdb.asset_health_summary"));
}

#[tokio::test]
async fn test_verify_without_scripts_reports_missing_objects() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };
    common::setup_fixture(&client).await;

    client
        .batch_execute("DROP FUNCTION amdb.asset_health_summary(bigint)")
        .await
        .unwrap();

    let mut inspector = SchemaInspector::connect(&config).await.unwrap();
    let checker = ConformanceChecker::new(Profile::Central)
        .with_script_root(PathBuf::from("/nonexistent/scripts"));
    let verification = checker.verify(&mut inspector).await.unwrap();

    assert!(!verification.success);
    let message = verification.error_message.unwrap();
    assert!(message.contains("Missing required DB objects"));
    assert!(message.contains("function amdb.asset_health_summary"));

    // Restore for subsequent tests
    for script in common::CENTRAL_SCRIPTS {
        client.batch_execute(script).await.unwrap();
    }
}

#[tokio::test]
async fn test_verify_reports_signature_mismatch() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };
    common::setup_fixture(&client).await;

    // Same name, different argument type: an overload the manifest does
    // not accept, with the expected one gone
    client
        .batch_execute(
            "DROP FUNCTION amdb.asset_health_summary(bigint); \
             CREATE FUNCTION amdb.asset_health_summary(p_asset_id integer) \
             RETURNS jsonb LANGUAGE sql AS $$ SELECT '{}'::jsonb $$",
        )
        .await
        .unwrap();

    let mut inspector = SchemaInspector::connect(&config).await.unwrap();
    let checker = ConformanceChecker::new(Profile::Central)
        .with_script_root(PathBuf::from("/nonexistent/scripts"));
    let verification = checker.verify(&mut inspector).await.unwrap();

    assert!(!verification.success);
    let message = verification.error_message.unwrap();
    assert!(message.contains("Signature mismatches"));
    assert!(message.contains("expected (p_asset_id bigint)"));

    client
        .batch_execute("DROP FUNCTION amdb.asset_health_summary(integer)")
        .await
        .unwrap();
    for script in common::CENTRAL_SCRIPTS {
        client.batch_execute(script).await.unwrap();
    }
}
