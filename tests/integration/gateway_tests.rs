//! Integration tests for the routine dispatch gateway
//!
//! These tests require the test PostgreSQL database to be running.
//! Start it with: docker-compose -f docker-compose.test.yml up -d

use std::time::Duration;

use callgres::db::SqlRow;
use callgres::error::GatewayError;
use callgres::gateway::{CallContext, Command, Gateway, Query};

use crate::common;

/// Connect, (re)apply the fixture schema, and reset the seed data.
async fn setup_gateway() -> Option<(Gateway, tokio_postgres::Client)> {
    let config = common::test_config();
    let client = common::raw_client(&config).await?;
    common::setup_fixture(&client).await;
    Some((Gateway::new(config), client))
}

#[tokio::test]
async fn test_set_returning_query_shapes_rows() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("list_open_work_orders");
    let rows: Vec<SqlRow> = gateway.execute_query(&spec, None).await.unwrap();

    assert_eq!(rows.len(), common::SEEDED_OPEN_WORK_ORDERS);
    assert_eq!(rows[0].columns(), &["id", "asset_id", "status"]);
    for row in &rows {
        assert_eq!(
            row.get("status"),
            Some(&callgres::db::SqlValue::Text("open".to_string()))
        );
    }
}

#[tokio::test]
async fn test_json_function_returns_document() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("asset_health_summary").param("p_asset_id", 1i64);
    let docs: Vec<serde_json::Value> = gateway.execute_query(&spec, None).await.unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["asset_id"], serde_json::json!(1));
    assert_eq!(docs[0]["open_work_orders"], serde_json::json!(2));
}

#[tokio::test]
async fn test_scalar_function_query() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("count_open_work_orders");
    let counts: Vec<i64> = gateway.execute_query(&spec, None).await.unwrap();
    assert_eq!(counts, vec![common::SEEDED_OPEN_WORK_ORDERS as i64]);
}

#[tokio::test]
async fn test_procedure_as_query_yields_empty_list() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("close_work_order")
        .param("p_work_order_id", 1i64)
        .param("p_closed_by", "tester");
    let rows: Vec<SqlRow> = gateway.execute_query(&spec, None).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_unknown_routine_fails_with_routine_not_found() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("no_such_routine");
    let err = gateway
        .execute_query::<SqlRow>(&spec, None)
        .await
        .unwrap_err();
    match err {
        GatewayError::RoutineNotFound { schema, name } => {
            assert_eq!(schema, "amdb");
            assert_eq!(name, "no_such_routine");
        }
        other => panic!("expected RoutineNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_type_mismatch_fails_with_cast_error() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("count_open_work_orders");
    let err = gateway.execute_query::<bool>(&spec, None).await.unwrap_err();
    match err {
        GatewayError::CastMismatch {
            produced,
            requested,
        } => {
            assert_eq!(produced, "int");
            assert_eq!(requested, "bool");
        }
        other => panic!("expected CastMismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_procedure_command_applies_side_effect() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Command::new("close_work_order")
        .param("p_work_order_id", 1i64)
        .param("p_closed_by", "inspector");
    gateway.execute_command(&spec, None).await.unwrap();

    let counts: Vec<i64> = gateway
        .execute_query(&Query::new("count_open_work_orders"), None)
        .await
        .unwrap();
    assert_eq!(counts, vec![common::SEEDED_OPEN_WORK_ORDERS as i64 - 1]);
}

#[tokio::test]
async fn test_function_as_command_reports_numeric_result_as_count() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let affected = gateway
        .execute_command(&Command::new("count_open_work_orders"), None)
        .await
        .unwrap();
    assert_eq!(affected, common::SEEDED_OPEN_WORK_ORDERS as u64);
}

#[tokio::test]
async fn test_second_begin_fails_while_scope_active() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let mut ctx = CallContext::new();
    ctx.begin_transaction(&gateway).await.unwrap();

    let err = ctx.begin_transaction(&gateway).await.unwrap_err();
    assert!(matches!(err, GatewayError::TransactionAlreadyActive));

    // Completing the first scope frees the context for a new one
    ctx.active_scope_mut().unwrap().rollback().await.unwrap();
    assert!(ctx.begin_transaction(&gateway).await.is_ok());
}

#[tokio::test]
async fn test_commit_after_rollback_is_a_no_op() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let mut ctx = CallContext::new();
    let scope = ctx.begin_transaction(&gateway).await.unwrap();

    let spec = Command::new("close_work_order")
        .param("p_work_order_id", 1i64)
        .param("p_closed_by", "tester");
    gateway.execute_command(&spec, Some(scope)).await.unwrap();

    scope.rollback().await.unwrap();
    scope.commit().await.unwrap();
    assert!(scope.is_completed());

    let counts: Vec<i64> = gateway
        .execute_query(&Query::new("count_open_work_orders"), None)
        .await
        .unwrap();
    assert_eq!(counts, vec![common::SEEDED_OPEN_WORK_ORDERS as i64]);
}

#[tokio::test]
async fn test_abandoned_scope_leaves_no_net_changes() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    {
        let mut ctx = CallContext::new();
        let scope = ctx.begin_transaction(&gateway).await.unwrap();
        let spec = Command::new("record_sensor_reading")
            .param("p_asset_id", 1i64)
            .param("p_points_json", serde_json::json!({"t": 21.5}));
        gateway.execute_command(&spec, Some(scope)).await.unwrap();
        // Dropped uncommitted: the dedicated connection closes and the
        // server discards the transaction
    }

    let counts: Vec<i64> = gateway
        .execute_query(
            &Query::new("count_readings").param("p_asset_id", 1i64),
            None,
        )
        .await
        .unwrap();
    assert_eq!(counts, vec![0]);
}

#[tokio::test]
async fn test_committed_scope_persists_and_savepoint_discards() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let mut ctx = CallContext::new();
    let scope = ctx.begin_transaction(&gateway).await.unwrap();

    let record = |points: serde_json::Value| {
        Command::new("record_sensor_reading")
            .param("p_asset_id", 2i64)
            .param("p_points_json", points)
    };

    gateway
        .execute_command(&record(serde_json::json!({"t": 20.0})), Some(scope))
        .await
        .unwrap();
    scope.savepoint("before_second").await.unwrap();
    gateway
        .execute_command(&record(serde_json::json!({"t": 99.9})), Some(scope))
        .await
        .unwrap();
    scope.rollback_to_savepoint("before_second").await.unwrap();
    scope.commit().await.unwrap();

    let counts: Vec<i64> = gateway
        .execute_query(
            &Query::new("count_readings").param("p_asset_id", 2i64),
            None,
        )
        .await
        .unwrap();
    assert_eq!(counts, vec![1]);
}

#[tokio::test]
async fn test_timeout_reports_cancelled_not_backend_error() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Query::new("slow_count").timeout(Duration::from_millis(200));
    let err = gateway.execute_query::<i64>(&spec, None).await.unwrap_err();
    assert!(
        matches!(err, GatewayError::Cancelled(_)),
        "expected Cancelled, got {:?}",
        err
    );

    // The gateway must still be usable: the timed-out connection was
    // released, not leaked into a wedged state
    let counts: Vec<i64> = gateway
        .execute_query(&Query::new("count_open_work_orders"), None)
        .await
        .unwrap();
    assert_eq!(counts, vec![common::SEEDED_OPEN_WORK_ORDERS as i64]);
}

#[tokio::test]
async fn test_json_hinted_param_binds_as_jsonb() {
    let _guard = common::DB_LOCK.lock().await;
    let Some((gateway, _client)) = setup_gateway().await else {
        return;
    };

    let spec = Command::new("record_sensor_reading")
        .param("p_asset_id", 1i64)
        .param(
            "p_points_json",
            serde_json::json!([{"t": 21.5, "unit": "C"}]),
        );
    gateway.execute_command(&spec, None).await.unwrap();

    let docs: Vec<serde_json::Value> = gateway
        .execute_query(
            &Query::new("asset_health_summary").param("p_asset_id", 1i64),
            None,
        )
        .await
        .unwrap();
    assert_eq!(docs[0]["readings"], serde_json::json!(1));
}

#[tokio::test]
async fn test_notifications_deliver_and_unsubscribe_stops_them() {
    let _guard = common::DB_LOCK.lock().await;
    let config = common::test_config();
    let Some(client) = common::raw_client(&config).await else {
        return;
    };

    let gateway = Gateway::new(config);
    let hub = gateway.hub();
    hub.subscribe("evt_x").await.unwrap();
    hub.subscribe("evt_y").await.unwrap();
    let mut rx = hub.notifications();

    client
        .batch_execute("SELECT pg_notify('evt_x', 'hello')")
        .await
        .unwrap();
    let note = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification not delivered")
        .unwrap();
    assert_eq!(note.channel, "evt_x");
    assert_eq!(note.payload, "hello");
    assert!(note.process_id > 0);

    hub.unsubscribe("evt_x").await.unwrap();
    client
        .batch_execute(
            "SELECT pg_notify('evt_x', 'dropped'); SELECT pg_notify('evt_y', 'kept')",
        )
        .await
        .unwrap();
    let note = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("evt_y notification not delivered")
        .unwrap();
    assert_eq!(note.channel, "evt_y");
    assert_eq!(note.payload, "kept");

    hub.shutdown().await;
}
