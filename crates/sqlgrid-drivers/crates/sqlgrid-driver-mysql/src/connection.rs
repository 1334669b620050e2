//! MySQL connection implementation

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::{
    Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row as MySqlRow,
    consts::ColumnType, prelude::*,
};
use sqlgrid_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, SchemaIntrospection, SqlDialect,
    SqlgridError, StatementResult, Transaction, Value,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// MySQL connection wrapper
///
/// The pool is pinned to exactly one physical connection so that every
/// statement, including a transaction's, runs on the same server session.
pub struct MySqlConnection {
    pool: Pool,
    /// Resolved at connect time so introspection does not depend on
    /// `DATABASE()` returning a value later.
    database_name: Option<String>,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Connect to a MySQL database
    pub async fn connect(
        host: &str,
        port: u16,
        database: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        tracing::info!(host = %host, port = %port, database = ?database, "connecting to MySQL database");

        let mut opts_builder = OptsBuilder::from_opts(Opts::default())
            .ip_or_hostname(host)
            .tcp_port(port)
            // Report matched rows, not changed rows, so an UPDATE that writes
            // the current value still counts as hitting its row.
            .client_found_rows(true);

        if let Some(db) = database {
            opts_builder = opts_builder.db_name(Some(db));
        }
        if let Some(u) = user {
            opts_builder = opts_builder.user(Some(u));
        }
        if let Some(p) = password {
            opts_builder = opts_builder.pass(Some(p));
        }

        let constraints = PoolConstraints::new(1, 1).ok_or_else(|| {
            SqlgridError::Connection(
                "Failed to configure MySQL pool constraints (min=1, max=1)".into(),
            )
        })?;
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            .with_reset_connection(false);
        opts_builder = opts_builder.pool_opts(pool_opts);

        let pool = Pool::new(Opts::from(opts_builder));

        let database_name = {
            let mut conn = pool.get_conn().await.map_err(|e| {
                SqlgridError::Connection(format!("Failed to connect to MySQL: {}", e))
            })?;
            match database {
                Some(db) => Some(db.to_string()),
                None => {
                    let row: Option<(Option<String>,)> = conn
                        .query_first("SELECT DATABASE()")
                        .await
                        .map_err(|e| {
                            SqlgridError::Query(format!("Failed to query DATABASE(): {}", e))
                        })?;
                    row.and_then(|(db,)| db)
                }
            }
        };

        tracing::info!(host = %host, port = %port, database = ?database_name, "MySQL connection established");
        Ok(Self {
            pool,
            database_name,
            closed: AtomicBool::new(false),
        })
    }

    async fn get_conn(&self) -> Result<Conn> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SqlgridError::Connection("MySQL connection is closed".into()));
        }
        self.pool
            .get_conn()
            .await
            .map_err(|e| SqlgridError::Connection(format!("Failed to get MySQL connection: {}", e)))
    }

    /// Database the session is bound to, if any
    pub fn default_database(&self) -> Option<&str> {
        self.database_name.as_deref()
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut conn = self.get_conn().await?;
        run_execute(&mut conn, sql, params).await
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut conn = self.get_conn().await?;
        run_query(&mut conn, sql, params).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning MySQL transaction");

        // Held until commit/rollback; the single-slot pool keeps other
        // statements queued behind it.
        let mut conn = self.get_conn().await?;
        conn.query_drop("START TRANSACTION")
            .await
            .map_err(|e| SqlgridError::Query(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(MySqlTransaction {
            conn: tokio::sync::Mutex::new(Some(conn)),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing MySQL connection pool");
        self.closed.store(true, Ordering::SeqCst);
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| SqlgridError::Connection(format!("Failed to close MySQL connection: {}", e)))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

/// MySQL transaction implementation
///
/// Owns the pool's only connection from `START TRANSACTION` until the
/// transaction ends; the connection goes back to the pool when dropped.
pub struct MySqlTransaction {
    conn: tokio::sync::Mutex<Option<Conn>>,
    committed: bool,
    rolled_back: bool,
}

impl MySqlTransaction {
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        match guard.take() {
            Some(mut conn) => conn.query_drop(statement).await.map_err(|e| {
                SqlgridError::Query(format!("Failed to {} transaction: {}", statement, e))
            }),
            None => Err(SqlgridError::Query(
                "Transaction connection no longer available".into(),
            )),
        }
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(SqlgridError::Query("Transaction already rolled back".into()));
        }
        if self.committed {
            return Err(SqlgridError::Query("Transaction already committed".into()));
        }

        tracing::debug!("committing MySQL transaction");
        self.finish("COMMIT").await?;
        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(SqlgridError::Query("Transaction already committed".into()));
        }
        if self.rolled_back {
            return Ok(());
        }

        tracing::debug!("rolling back MySQL transaction");
        self.rolled_back = true;
        self.finish("ROLLBACK").await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing statement in MySQL transaction");
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            SqlgridError::Query("Transaction connection no longer available".into())
        })?;
        run_execute(conn, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing query in MySQL transaction");
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            SqlgridError::Query("Transaction connection no longer available".into())
        })?;
        run_query(conn, sql, params).await
    }
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        if self.committed || self.rolled_back {
            return;
        }
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        tracing::warn!("MySQL transaction dropped without commit or rollback, issuing automatic rollback");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.query_drop("ROLLBACK").await {
                        tracing::error!(error = %e, "automatic rollback on drop failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!("no runtime available to roll back dropped MySQL transaction");
            }
        }
    }
}

async fn run_execute(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let outcome = if params.is_empty() {
        conn.query_drop(sql).await
    } else {
        conn.exec_drop(sql, to_mysql_params(params)).await
    };
    outcome.map_err(|e| SqlgridError::Query(format!("Failed to execute statement: {}", e)))?;

    let affected_rows = conn.affected_rows();
    let last_insert_id = conn
        .last_insert_id()
        .filter(|id| *id > 0)
        .and_then(|id| i64::try_from(id).ok());

    tracing::debug!(affected_rows = affected_rows, "statement executed");
    Ok(StatementResult {
        affected_rows,
        last_insert_id,
    })
}

async fn run_query(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    let mysql_rows: Vec<MySqlRow> = if params.is_empty() {
        conn.query(sql).await
    } else {
        conn.exec(sql, to_mysql_params(params)).await
    }
    .map_err(|e| SqlgridError::Query(format!("Failed to execute query: {}", e)))?;

    let mut columns = Vec::new();
    let mut column_names = Vec::new();
    let mut column_types = Vec::new();
    if let Some(first_row) = mysql_rows.first() {
        for (idx, col) in first_row.columns_ref().iter().enumerate() {
            let name = col.name_str().to_string();
            column_names.push(name.clone());
            column_types.push(col.column_type());
            columns.push(ColumnMeta {
                name,
                data_type: format!("{:?}", col.column_type()),
                nullable: true,
                ordinal: idx,
            });
        }
    }

    let mut rows = Vec::with_capacity(mysql_rows.len());
    for mysql_row in mysql_rows {
        let mut values = Vec::with_capacity(column_names.len());
        for (idx, col_type) in column_types.iter().enumerate() {
            let mysql_val: mysql_async::Value =
                mysql_row.get(idx).unwrap_or(mysql_async::Value::NULL);
            values.push(mysql_value_to_value(mysql_val, *col_type));
        }
        rows.push(Row::new(column_names.clone(), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms,
    })
}

fn to_mysql_params(params: &[Value]) -> Params {
    Params::Positional(params.iter().map(value_to_mysql).collect())
}

/// Convert our Value type to a bindable mysql_async value
fn value_to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as My;
    match value {
        Value::Null => My::NULL,
        Value::Bool(b) => My::Int(i64::from(*b)),
        Value::Int64(i) => My::Int(*i),
        Value::Float64(f) => My::Double(*f),
        Value::Decimal(d) => My::Bytes(d.as_bytes().to_vec()),
        Value::String(s) => My::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => My::Bytes(b.clone()),
        Value::Date(d) => My::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => My::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::DateTime(dt) => My::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
    }
}

/// Convert mysql_async Value to our Value type, using column type metadata
/// to interpret byte strings from the text protocol.
fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                ColumnType::MYSQL_TYPE_DATE => chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map(Value::Date)
                    .unwrap_or(Value::String(s)),
                ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
                    chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(Value::DateTime)
                        .unwrap_or(Value::String(s))
                }
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int64(i),
            Err(_) => Value::Decimal(u.to_string()),
        },
        mysql_async::Value::Float(f) => Value::Float64(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            match (date, col_type) {
                (Some(date), ColumnType::MYSQL_TYPE_DATE) => Value::Date(date),
                (Some(date), _) => date
                    .and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    .map(Value::DateTime)
                    .unwrap_or_else(|| Value::String(date.to_string())),
                // Zero dates ('0000-00-00') have no chrono representation.
                (None, _) => Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                )),
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            match chrono::NaiveTime::from_hms_micro_opt(hours as u32, mins as u32, secs as u32, micros)
            {
                Some(t) if !negative && days == 0 => Value::Time(t),
                _ => {
                    let total_hours = days * 24 + hours as u32;
                    let sign = if negative { "-" } else { "" };
                    Value::String(format!(
                        "{}{:02}:{:02}:{:02}.{:06}",
                        sign, total_hours, mins, secs, micros
                    ))
                }
            }
        }
    }
}
