//! Schema inspection and refresh against SQLite

mod common;

use common::{MockConnection, orders_db};
use pretty_assertions::assert_eq;
use sqlgrid_sync::{
    ColumnType, GridModel, Identifier, RefreshLoop, RefreshOutcome, SchemaInspector, SyncConfig,
    SyncError, Value,
};
use std::sync::Arc;

fn orders() -> Identifier {
    Identifier::parse("orders").unwrap()
}

#[tokio::test]
async fn inspects_columns_and_key() {
    let conn = orders_db().await;
    let schema = SchemaInspector::new(conn).inspect(&orders()).await.unwrap();

    assert_eq!(schema.column_names(), vec!["id", "status"]);
    assert_eq!(schema.primary_key, vec![Identifier::parse("id").unwrap()]);
    let status = schema.column("status").unwrap();
    assert_eq!(status.column_type, ColumnType::Text { max_len: Some(20) });
    assert!(!status.nullable);
    assert!(!status.can_omit_on_insert());
}

#[tokio::test]
async fn composite_keys_keep_key_order() {
    let conn = orders_db().await;
    conn.execute(
        "CREATE TABLE order_lines (line INTEGER, order_id INTEGER, qty INT, PRIMARY KEY (order_id, line))",
        &[],
    )
    .await
    .unwrap();

    let schema = SchemaInspector::new(conn)
        .inspect(&Identifier::parse("order_lines").unwrap())
        .await
        .unwrap();
    let key: Vec<&str> = schema.primary_key.iter().map(|k| k.as_str()).collect();
    assert_eq!(key, vec!["order_id", "line"]);
    assert!(schema.columns.iter().all(|c| !c.auto_increment));
}

#[tokio::test]
async fn missing_table_is_schema_not_found() {
    let conn = orders_db().await;
    let err = SchemaInspector::new(conn)
        .inspect(&Identifier::parse("ghosts").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::SchemaNotFound("ghosts".into()));
}

#[tokio::test]
async fn drivers_without_introspection_fail_cleanly() {
    let conn = Arc::new(MockConnection::orders().without_introspection());
    let err = SchemaInspector::new(conn).inspect(&orders()).await.unwrap_err();
    assert!(matches!(err, SyncError::IntrospectionFailed { .. }));
}

#[tokio::test]
async fn load_fills_the_grid_in_key_order() {
    let conn = orders_db().await;
    conn.execute("INSERT INTO orders (id, status) VALUES (3, 'late')", &[])
        .await
        .unwrap();
    conn.execute("INSERT INTO orders (id, status) VALUES (2, 'paid')", &[])
        .await
        .unwrap();

    let refresher = RefreshLoop::new(conn, &SyncConfig::default());
    let mut grid = GridModel::new();
    let loaded = refresher.load(&orders(), &mut grid).await.unwrap();

    assert_eq!(loaded, 3);
    let ids: Vec<&Value> = grid.rows().iter().map(|r| &r.values[0]).collect();
    assert_eq!(ids, vec![&Value::Int64(1), &Value::Int64(2), &Value::Int64(3)]);
    assert!(grid.rows().iter().all(|r| r.key.is_some()));
}

#[tokio::test]
async fn row_limit_caps_the_fetch() {
    let conn = orders_db().await;
    for id in 2..=5 {
        conn.execute(
            "INSERT INTO orders (id, status) VALUES (?, 'open')",
            &[Value::Int64(id)],
        )
        .await
        .unwrap();
    }
    let config = SyncConfig {
        row_limit: Some(2),
        ..SyncConfig::default()
    };
    let mut grid = GridModel::new();
    RefreshLoop::new(conn, &config)
        .load(&orders(), &mut grid)
        .await
        .unwrap();
    assert_eq!(grid.len(), 2);
}

#[tokio::test]
async fn refresh_without_changes_is_idempotent() {
    let conn = orders_db().await;
    let refresher = RefreshLoop::new(conn, &SyncConfig::default());
    let mut grid = GridModel::new();
    refresher.load(&orders(), &mut grid).await.unwrap();
    let before = grid.snapshot();

    assert_eq!(refresher.refresh(&mut grid).await.unwrap(), RefreshOutcome::Unchanged);
    assert_eq!(refresher.refresh(&mut grid).await.unwrap(), RefreshOutcome::Unchanged);
    assert_eq!(grid.snapshot(), before);
}

#[tokio::test]
async fn refresh_picks_up_external_writes() {
    let conn = orders_db().await;
    let refresher = RefreshLoop::new(conn.clone(), &SyncConfig::default());
    let mut grid = GridModel::new();
    refresher.load(&orders(), &mut grid).await.unwrap();

    conn.execute("UPDATE orders SET status = 'shipped' WHERE id = 1", &[])
        .await
        .unwrap();
    let outcome = refresher.refresh(&mut grid).await.unwrap();

    assert_eq!(
        outcome,
        RefreshOutcome::Refreshed {
            drift: None,
            row_count: 1
        }
    );
    assert_eq!(grid.rows()[0].values[1], Value::from("shipped"));
}

#[tokio::test]
async fn refresh_reports_schema_drift() {
    let conn = orders_db().await;
    let refresher = RefreshLoop::new(conn.clone(), &SyncConfig::default());
    let mut grid = GridModel::new();
    refresher.load(&orders(), &mut grid).await.unwrap();

    conn.execute("ALTER TABLE orders ADD COLUMN note TEXT", &[])
        .await
        .unwrap();
    let outcome = refresher.refresh(&mut grid).await.unwrap();

    match outcome {
        RefreshOutcome::Refreshed {
            drift: Some(drift), ..
        } => assert_eq!(drift.added, vec!["note".to_string()]),
        other => panic!("expected drift, got {:?}", other),
    }
    assert_eq!(grid.schema().unwrap().columns.len(), 3);
    assert_eq!(grid.rows()[0].values[2], Value::Null);
}

#[tokio::test]
async fn dropped_table_invalidates_the_selection() {
    let conn = orders_db().await;
    let refresher = RefreshLoop::new(conn.clone(), &SyncConfig::default());
    let mut grid = GridModel::new();
    refresher.load(&orders(), &mut grid).await.unwrap();

    conn.execute("DROP TABLE orders", &[]).await.unwrap();
    let outcome = refresher.refresh(&mut grid).await.unwrap();

    assert_eq!(outcome, RefreshOutcome::SelectionInvalidated { table: orders() });
    assert!(grid.schema().is_none());
    assert!(grid.is_empty());
}

#[tokio::test]
async fn refresh_with_nothing_selected_is_idle() {
    let conn = orders_db().await;
    let refresher = RefreshLoop::new(conn, &SyncConfig::default());
    let mut grid = GridModel::new();
    assert_eq!(refresher.refresh(&mut grid).await.unwrap(), RefreshOutcome::Idle);
}
