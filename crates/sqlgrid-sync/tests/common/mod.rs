//! Common test utilities and mocks

#![allow(dead_code)]

use async_trait::async_trait;
use sqlgrid_core::{
    ColumnInfo, Connection, QueryResult, Result, Row, SchemaIntrospection, SqlgridError,
    StatementResult, TableInfo, Transaction, Value,
};
use sqlgrid_driver_sqlite::SqliteConnection;
use sqlgrid_sync::{GridSnapshot, SyncConfig, SyncCoordinator, SyncError, SyncEvent};
use std::sync::Arc;

/// How the mock store answers statements run inside a transaction
#[derive(Debug, Clone)]
pub enum ExecuteBehavior {
    Affect(u64),
    /// Statement rejected by the store (constraint, syntax, ...)
    Reject(String),
    /// Session dropped mid-statement
    Disconnect,
}

/// Mock connection for exercising engine failure paths that a real store
/// cannot produce on demand.
///
/// Serves one table (`orders` unless renamed with [`MockConnection::with_table`])
/// and records every statement plus transaction boundaries in `query_log`.
pub struct MockConnection {
    pub driver: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
    pub execute_behavior: ExecuteBehavior,
    pub introspection: bool,
    /// Log of all SQL executed, for assertion in tests
    pub query_log: Arc<parking_lot::Mutex<Vec<String>>>,
    /// Bound parameters of every `execute`, in order
    pub param_log: Arc<parking_lot::Mutex<Vec<Vec<Value>>>>,
}

impl MockConnection {
    /// `orders(id INTEGER PK AUTOINCREMENT, status VARCHAR(20) NOT NULL)`
    pub fn orders() -> Self {
        Self {
            driver: "mock".to_string(),
            table: "orders".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    ordinal: 0,
                    data_type: "INTEGER".into(),
                    nullable: false,
                    default_value: None,
                    is_primary_key: true,
                    is_auto_increment: true,
                },
                ColumnInfo {
                    name: "status".into(),
                    ordinal: 1,
                    data_type: "VARCHAR(20)".into(),
                    nullable: false,
                    ..Default::default()
                },
            ],
            rows: vec![vec![Value::Int64(1), Value::from("open")]],
            execute_behavior: ExecuteBehavior::Affect(1),
            introspection: true,
            query_log: Arc::new(parking_lot::Mutex::new(Vec::new())),
            param_log: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_columns(mut self, columns: Vec<ColumnInfo>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_execute(mut self, behavior: ExecuteBehavior) -> Self {
        self.execute_behavior = behavior;
        self
    }

    pub fn without_introspection(mut self) -> Self {
        self.introspection = false;
        self
    }

    pub fn query_log(&self) -> Vec<String> {
        self.query_log.lock().clone()
    }

    pub fn param_log(&self) -> Vec<Vec<Value>> {
        self.param_log.lock().clone()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        run_statement(
            &self.execute_behavior,
            &self.query_log,
            &self.param_log,
            sql,
            params,
        )
    }
}

fn run_statement(
    behavior: &ExecuteBehavior,
    query_log: &parking_lot::Mutex<Vec<String>>,
    param_log: &parking_lot::Mutex<Vec<Vec<Value>>>,
    sql: &str,
    params: &[Value],
) -> Result<StatementResult> {
    query_log.lock().push(sql.to_string());
    param_log.lock().push(params.to_vec());
    match behavior {
        ExecuteBehavior::Affect(n) => Ok(StatementResult {
            affected_rows: *n,
            last_insert_id: sql.starts_with("INSERT").then_some(2),
        }),
        ExecuteBehavior::Reject(msg) => Err(SqlgridError::Query(msg.clone())),
        ExecuteBehavior::Disconnect => {
            Err(SqlgridError::Connection("server has gone away".into()))
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        &self.driver
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.run(sql, params)
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.query_log.lock().push(sql.to_string());
        let columns = self.column_names();
        Ok(QueryResult {
            rows: self
                .rows
                .iter()
                .map(|values| Row::new(columns.clone(), values.clone()))
                .collect(),
            ..QueryResult::default()
        })
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.query_log.lock().push("BEGIN".to_string());
        Ok(Box::new(MockTransaction {
            behavior: self.execute_behavior.clone(),
            query_log: Arc::clone(&self.query_log),
            param_log: Arc::clone(&self.param_log),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        if self.introspection { Some(self) } else { None }
    }
}

#[async_trait]
impl SchemaIntrospection for MockConnection {
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        Ok(vec![TableInfo {
            name: self.table.clone(),
            row_count: Some(self.rows.len() as i64),
        }])
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(table == self.table)
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if table == self.table {
            Ok(self.columns.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

pub struct MockTransaction {
    behavior: ExecuteBehavior,
    query_log: Arc<parking_lot::Mutex<Vec<String>>>,
    param_log: Arc<parking_lot::Mutex<Vec<Vec<Value>>>>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.query_log.lock().push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.query_log.lock().push("ROLLBACK".to_string());
        Ok(())
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        run_statement(&self.behavior, &self.query_log, &self.param_log, sql, params)
    }
}

/// In-memory SQLite holding `orders(id, status)` with the single row `(1, 'open')`
pub async fn orders_db() -> Arc<dyn Connection> {
    let conn = SqliteConnection::open(":memory:").expect("open in-memory SQLite");
    conn.execute(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, status VARCHAR(20) NOT NULL)",
        &[],
    )
    .await
    .expect("create orders");
    conn.execute("INSERT INTO orders (id, status) VALUES (1, 'open')", &[])
        .await
        .expect("seed orders");
    Arc::new(conn)
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        refresh_interval_ms: 100,
        ..SyncConfig::default()
    }
}

/// Coordinator over `conn` with `orders` already selected
pub async fn coordinator_on_orders(conn: Arc<dyn Connection>) -> SyncCoordinator {
    let mut coordinator = SyncCoordinator::new(conn, test_config()).expect("valid config");
    let events = coordinator
        .handle(sqlgrid_sync::SyncCommand::SelectTable("orders".into()))
        .await;
    assert!(errors(&events).is_empty(), "select failed: {:?}", events);
    coordinator
}

pub fn last_snapshot(events: &[SyncEvent]) -> Option<&GridSnapshot> {
    events.iter().rev().find_map(|e| match e {
        SyncEvent::Snapshot(s) => Some(s),
        _ => None,
    })
}

pub fn errors(events: &[SyncEvent]) -> Vec<&SyncError> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Error(err) => Some(err),
            _ => None,
        })
        .collect()
}

/// Cell values of a snapshot, row by row
pub fn cells(snapshot: &GridSnapshot) -> Vec<Vec<Value>> {
    snapshot.rows.iter().map(|r| r.values.clone()).collect()
}
