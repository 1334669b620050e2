//! Mutation translator: transaction handling and store round trips

mod common;

use common::{ExecuteBehavior, MockConnection, orders_db};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use sqlgrid_sync::{
    Applied, DefaultPolicy, Identifier, MutationTranslator, PendingIntent, RowKey,
    SchemaInspector, SyncError, TableSchema, Value,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn orders_schema(conn: Arc<dyn sqlgrid_sync::Connection>) -> TableSchema {
    SchemaInspector::new(conn)
        .inspect(&Identifier::parse("orders").unwrap())
        .await
        .unwrap()
}

fn edit_status(id: i64, status: &str) -> PendingIntent {
    PendingIntent::EditCell {
        row: RowKey::single("id", id).unwrap(),
        column: "status".into(),
        value: Value::from(status),
    }
}

#[tokio::test]
async fn successful_edit_commits() {
    let mock = Arc::new(MockConnection::orders());
    let schema = orders_schema(mock.clone()).await;
    let translator = MutationTranslator::new(mock.clone(), DefaultPolicy::default());

    let applied = translator
        .apply(&edit_status(1, "closed"), Some(&schema))
        .await
        .unwrap();

    assert_eq!(
        applied,
        Applied::CellUpdated {
            row: RowKey::single("id", 1).unwrap(),
            column: "status".into(),
            value: Value::from("closed"),
        }
    );
    let log = mock.query_log();
    let tail = &log[log.len() - 3..];
    assert_eq!(
        tail,
        [
            "BEGIN",
            "UPDATE \"orders\" SET \"status\" = ? WHERE \"id\" = ?",
            "COMMIT"
        ]
    );
    assert_eq!(
        mock.param_log().last().unwrap(),
        &vec![Value::from("closed"), Value::Int64(1)]
    );
}

#[tokio::test]
async fn missing_row_rolls_back_as_stale() {
    let mock = Arc::new(MockConnection::orders().with_execute(ExecuteBehavior::Affect(0)));
    let schema = orders_schema(mock.clone()).await;
    let translator = MutationTranslator::new(mock.clone(), DefaultPolicy::default());

    let err = translator
        .apply(&edit_status(9, "closed"), Some(&schema))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::StaleReference(_)));
    assert!(err.needs_refresh());
    assert_eq!(mock.query_log().last().unwrap(), "ROLLBACK");
}

#[tokio::test]
async fn ambiguous_key_rolls_back() {
    let mock = Arc::new(MockConnection::orders().with_execute(ExecuteBehavior::Affect(2)));
    let schema = orders_schema(mock.clone()).await;
    let translator = MutationTranslator::new(mock.clone(), DefaultPolicy::default());

    let err = translator
        .apply(
            &PendingIntent::DeleteRow {
                row: RowKey::single("id", 1).unwrap(),
            },
            Some(&schema),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MutationFailed { .. }));
    assert_eq!(mock.query_log().last().unwrap(), "ROLLBACK");
}

#[tokio::test]
async fn rejected_statement_is_a_mutation_failure() {
    let mock = Arc::new(
        MockConnection::orders()
            .with_execute(ExecuteBehavior::Reject("CHECK constraint failed".into())),
    );
    let schema = orders_schema(mock.clone()).await;
    let translator = MutationTranslator::new(mock.clone(), DefaultPolicy::default());

    let err = translator
        .apply(&edit_status(1, "closed"), Some(&schema))
        .await
        .unwrap_err();

    match &err {
        SyncError::MutationFailed { reason } => assert!(reason.contains("CHECK constraint")),
        other => panic!("unexpected {:?}", other),
    }
    let log = mock.query_log();
    assert!(!log.contains(&"COMMIT".to_string()));
    assert_eq!(log.last().unwrap(), "ROLLBACK");
}

#[tokio::test]
async fn lost_session_is_fatal() {
    let mock = Arc::new(MockConnection::orders().with_execute(ExecuteBehavior::Disconnect));
    let schema = orders_schema(mock.clone()).await;
    let translator = MutationTranslator::new(mock.clone(), DefaultPolicy::default());

    let err = translator
        .apply(&edit_status(1, "closed"), Some(&schema))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
}

#[tokio::test]
async fn validation_never_reaches_the_store() {
    let mock = Arc::new(MockConnection::orders());
    let schema = orders_schema(mock.clone()).await;
    let translator = MutationTranslator::new(mock.clone(), DefaultPolicy::default());
    let before = mock.query_log().len();

    let err = translator
        .apply(
            &PendingIntent::EditCell {
                row: RowKey::single("id", 1).unwrap(),
                column: "status".into(),
                value: Value::from("x".repeat(21)),
            },
            Some(&schema),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(mock.query_log().len(), before);
}

#[tokio::test]
async fn insert_reports_the_new_id() {
    let conn = orders_db().await;
    let schema = orders_schema(conn.clone()).await;
    let translator = MutationTranslator::new(conn.clone(), DefaultPolicy::default());

    let mut values = IndexMap::new();
    values.insert("status".to_string(), Value::from("pending"));
    let applied = translator
        .apply(&PendingIntent::AddRow { values }, Some(&schema))
        .await
        .unwrap();

    assert_eq!(
        applied,
        Applied::RowInserted {
            last_insert_id: Some(2)
        }
    );
    let count = conn
        .query("SELECT COUNT(*) FROM orders", &[])
        .await
        .unwrap();
    assert_eq!(count.scalar(), Some(&Value::Int64(2)));
}

#[tokio::test]
async fn constraint_violation_leaves_store_untouched() {
    let conn = orders_db().await;
    let schema = orders_schema(conn.clone()).await;
    let translator = MutationTranslator::new(conn.clone(), DefaultPolicy::default());

    let mut values = IndexMap::new();
    values.insert("id".to_string(), Value::Int64(1));
    values.insert("status".to_string(), Value::from("duplicate"));
    let err = translator
        .apply(&PendingIntent::AddRow { values }, Some(&schema))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MutationFailed { .. }));
    let rows = conn
        .query("SELECT id, status FROM orders", &[])
        .await
        .unwrap();
    assert_eq!(rows.row_count(), 1);
    assert_eq!(rows.rows[0].get(1), Some(&Value::from("open")));
}

#[tokio::test]
async fn statement_timeout_interrupts_slow_sqlite_writes() {
    let conn = orders_db().await;
    conn.execute("CREATE TABLE digits (d INTEGER)", &[])
        .await
        .unwrap();
    conn.execute(
        "INSERT INTO digits (d) VALUES (0), (1), (2), (3), (4), (5), (6), (7), (8), (9)",
        &[],
    )
    .await
    .unwrap();
    // Every insert into orders first counts a billion-row cross join
    conn.execute(
        "CREATE TRIGGER slow_insert BEFORE INSERT ON orders BEGIN \
         SELECT count(*) FROM digits a, digits b, digits c, digits d, digits e, \
         digits f, digits g, digits h, digits i; \
         END",
        &[],
    )
    .await
    .unwrap();
    let schema = orders_schema(conn.clone()).await;
    let translator = MutationTranslator::new(conn.clone(), DefaultPolicy::default())
        .with_statement_timeout(Some(Duration::from_millis(200)));

    let mut values = IndexMap::new();
    values.insert("status".to_string(), Value::from("late"));
    let started = Instant::now();
    let err = translator
        .apply(&PendingIntent::AddRow { values }, Some(&schema))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MutationFailed { .. }), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
    let rows = conn.query("SELECT id FROM orders", &[]).await.unwrap();
    assert_eq!(rows.row_count(), 1);
}

#[tokio::test]
async fn table_lifecycle_against_sqlite() {
    let conn = orders_db().await;
    let translator = MutationTranslator::new(conn.clone(), DefaultPolicy::default());
    let inspector = SchemaInspector::new(conn.clone());

    translator
        .apply(
            &PendingIntent::CreateTable {
                name: "customers".into(),
            },
            None,
        )
        .await
        .unwrap();
    let customers = inspector
        .inspect(&Identifier::parse("customers").unwrap())
        .await
        .unwrap();
    assert_eq!(customers.primary_key, vec![Identifier::parse("id").unwrap()]);
    assert!(customers.columns[0].auto_increment);

    translator
        .apply(
            &PendingIntent::RenameTable {
                old: "customers".into(),
                new: "clients".into(),
            },
            None,
        )
        .await
        .unwrap();
    let names: Vec<String> = inspector
        .list_tables()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["clients", "orders"]);

    translator
        .apply(
            &PendingIntent::DropTable {
                name: "clients".into(),
            },
            None,
        )
        .await
        .unwrap();
    let err = inspector
        .inspect(&Identifier::parse("clients").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::SchemaNotFound("clients".into()));
}

#[tokio::test]
async fn failed_ddl_rolls_back_on_sqlite() {
    let conn = orders_db().await;
    let translator = MutationTranslator::new(conn.clone(), DefaultPolicy::default());

    let err = translator
        .apply(
            &PendingIntent::CreateTable {
                name: "orders".into(),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MutationFailed { .. }));

    // The session is usable again after the rollback
    let tables = SchemaInspector::new(conn).list_tables().await.unwrap();
    assert_eq!(tables.len(), 1);
}
