//! Turns a [`PendingIntent`] into one store statement and runs it in a
//! transaction.
//!
//! Planning is pure: it validates the intent against the current schema and
//! produces the statement text, its bound parameters, and the grid patch to
//! perform once the store confirms. Execution wraps the statement in
//! begin/commit, checks the affected-row count for row-targeted statements,
//! and rolls back on any failure.

use sqlgrid_core::{Connection, Identifier, SqlDialect, Transaction, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::defaults::DefaultPolicy;
use crate::grid::RowKey;
use crate::intent::PendingIntent;
use crate::schema::{Column, ColumnType, TableSchema};
use crate::timeout::bounded;
use crate::{SyncError, SyncResult};

/// Affected-row check applied before commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowExpectation {
    /// Row-targeted DML: 0 rows is a stale key, more than 1 is a failure
    ExactlyOne,
    /// DDL reports no meaningful count
    Unchecked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub expect: RowExpectation,
}

/// What the store confirmed, i.e. which grid patch to perform
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    CellUpdated {
        row: RowKey,
        column: String,
        value: Value,
    },
    RowInserted {
        last_insert_id: Option<i64>,
    },
    RowDeleted {
        row: RowKey,
    },
    ColumnAdded {
        column: Column,
        fill: Value,
    },
    ColumnRemoved {
        name: String,
    },
    TableRenamed {
        old: Identifier,
        new: Identifier,
    },
    TableDropped {
        name: Identifier,
    },
    TableCreated {
        name: Identifier,
    },
}

impl Applied {
    /// One-line confirmation for the user
    pub fn describe(&self) -> String {
        match self {
            Applied::CellUpdated { row, column, .. } => {
                format!("Updated '{}' of row {}", column, row)
            }
            Applied::RowInserted {
                last_insert_id: Some(id),
            } => format!("Row added (id {})", id),
            Applied::RowInserted { last_insert_id: None } => "Row added".to_string(),
            Applied::RowDeleted { row } => format!("Deleted row {}", row),
            Applied::ColumnAdded { column, .. } => format!("Column '{}' added", column.name),
            Applied::ColumnRemoved { name } => format!("Column '{}' removed", name),
            Applied::TableRenamed { old, new } => {
                format!("Table '{}' renamed to '{}'", old, new)
            }
            Applied::TableDropped { name } => format!("Table '{}' dropped", name),
            Applied::TableCreated { name } => format!("Table '{}' created", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub statement: Statement,
    pub applied: Applied,
}

pub struct MutationTranslator {
    conn: Arc<dyn Connection>,
    dialect: SqlDialect,
    defaults: DefaultPolicy,
    statement_timeout: Option<Duration>,
}

impl MutationTranslator {
    pub fn new(conn: Arc<dyn Connection>, defaults: DefaultPolicy) -> Self {
        let dialect = conn.dialect();
        Self {
            conn,
            dialect,
            defaults,
            statement_timeout: None,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Validate `intent` against `schema` and build its statement
    pub fn plan(
        &self,
        intent: &PendingIntent,
        schema: Option<&TableSchema>,
    ) -> SyncResult<MutationPlan> {
        plan_intent(self.dialect, &self.defaults, intent, schema)
    }

    /// Plan and execute in one go
    pub async fn apply(
        &self,
        intent: &PendingIntent,
        schema: Option<&TableSchema>,
    ) -> SyncResult<Applied> {
        let plan = self.plan(intent, schema)?;
        self.execute(plan).await
    }

    /// Run a planned statement inside its own transaction
    #[tracing::instrument(skip_all, fields(sql = %plan.statement.sql))]
    pub async fn execute(&self, plan: MutationPlan) -> SyncResult<Applied> {
        let MutationPlan { statement, applied } = plan;
        if !self.dialect.transactional_ddl() && statement.expect == RowExpectation::Unchecked {
            tracing::debug!("store commits DDL implicitly; rollback cannot undo this statement");
        }

        let tx = bounded(
            self.statement_timeout,
            "begin transaction",
            self.conn.begin_transaction(),
        )
        .await?;

        let outcome = bounded(
            self.statement_timeout,
            "statement",
            tx.execute(&statement.sql, &statement.params),
        )
        .await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "statement failed, rolling back");
                rollback(tx).await;
                return Err(e.into());
            }
        };

        if statement.expect == RowExpectation::ExactlyOne {
            match result.affected_rows {
                1 => {}
                0 => {
                    rollback(tx).await;
                    return Err(SyncError::StaleReference(
                        "the targeted row no longer exists".into(),
                    ));
                }
                n => {
                    rollback(tx).await;
                    return Err(SyncError::mutation(format!(
                        "{} rows matched where exactly one was expected",
                        n
                    )));
                }
            }
        }

        bounded(self.statement_timeout, "commit", tx.commit()).await?;
        tracing::debug!(affected_rows = result.affected_rows, "mutation committed");

        Ok(match applied {
            Applied::RowInserted { .. } => Applied::RowInserted {
                last_insert_id: result.last_insert_id,
            },
            other => other,
        })
    }
}

async fn rollback(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::error!(error = %e, "rollback failed");
    }
}

/// Name of the surrogate key column of tables created through the engine
const CREATED_TABLE_KEY: &str = "id";

pub(crate) fn plan_intent(
    dialect: SqlDialect,
    defaults: &DefaultPolicy,
    intent: &PendingIntent,
    schema: Option<&TableSchema>,
) -> SyncResult<MutationPlan> {
    let q = |ident: &Identifier| dialect.quote(ident);

    match intent {
        PendingIntent::EditCell { row, column, value } => {
            let schema = schema.ok_or(SyncError::NoTableSelected)?;
            let target = schema.column(column).ok_or_else(|| {
                SyncError::StaleReference(format!(
                    "column '{}' no longer exists in '{}'",
                    column, schema.table
                ))
            })?;
            let value = target.column_type.coerce(value.clone())?;

            let mut params = vec![value.clone()];
            let predicate = key_predicate(dialect, schema, row, &mut params)?;
            let sql = format!(
                "UPDATE {} SET {} = ? WHERE {}",
                q(&schema.table),
                q(&target.name),
                predicate
            );
            Ok(MutationPlan {
                statement: Statement {
                    sql,
                    params,
                    expect: RowExpectation::ExactlyOne,
                },
                applied: Applied::CellUpdated {
                    row: row.clone(),
                    column: target.name.to_string(),
                    value,
                },
            })
        }

        PendingIntent::AddRow { values } => {
            let schema = schema.ok_or(SyncError::NoTableSelected)?;
            if let Some(unknown) = values.keys().find(|name| schema.column(name).is_none()) {
                return Err(SyncError::Validation(format!(
                    "'{}' has no column '{}'",
                    schema.table, unknown
                )));
            }

            let mut columns = Vec::new();
            let mut params = Vec::new();
            for column in &schema.columns {
                match values.get(column.name.as_str()) {
                    Some(value) if value.is_null() && column.auto_increment => {}
                    Some(value) => {
                        columns.push(q(&column.name));
                        params.push(column.column_type.coerce(value.clone())?);
                    }
                    None if column.can_omit_on_insert() => {}
                    None => {
                        return Err(SyncError::Validation(format!(
                            "column '{}' has no default and needs a value",
                            column.name
                        )));
                    }
                }
            }

            let sql = if columns.is_empty() {
                dialect.insert_default_values(&schema.table)
            } else {
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    q(&schema.table),
                    columns.join(", "),
                    vec![dialect.placeholder(); params.len()].join(", ")
                )
            };
            Ok(MutationPlan {
                statement: Statement {
                    sql,
                    params,
                    expect: RowExpectation::ExactlyOne,
                },
                applied: Applied::RowInserted {
                    last_insert_id: None,
                },
            })
        }

        PendingIntent::DeleteRow { row } => {
            let schema = schema.ok_or(SyncError::NoTableSelected)?;
            let mut params = Vec::new();
            let predicate = key_predicate(dialect, schema, row, &mut params)?;
            let sql = format!("DELETE FROM {} WHERE {}", q(&schema.table), predicate);
            Ok(MutationPlan {
                statement: Statement {
                    sql,
                    params,
                    expect: RowExpectation::ExactlyOne,
                },
                applied: Applied::RowDeleted { row: row.clone() },
            })
        }

        PendingIntent::AddColumn {
            name,
            column_type,
            default,
        } => {
            let schema = schema.ok_or(SyncError::NoTableSelected)?;
            let name = Identifier::parse(name)?;
            if schema.column(name.as_str()).is_some() {
                return Err(SyncError::Validation(format!(
                    "'{}' already has a column '{}'",
                    schema.table, name
                )));
            }
            let type_text = column_type.trim();
            let parsed_type = ColumnType::parse_ddl(type_text)?;
            let fill = match default {
                Some(value) => parsed_type.coerce(value.clone())?,
                None => defaults.default_for(&parsed_type)?,
            };
            let literal = dialect
                .render_literal(&fill)
                .map_err(|e| SyncError::Validation(e.to_string()))?;

            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {} DEFAULT {}",
                q(&schema.table),
                q(&name),
                type_text,
                literal
            );
            let column = Column {
                name,
                column_type: parsed_type,
                raw_type: type_text.to_string(),
                default_value: Some(literal),
                nullable: true,
                primary_key: false,
                auto_increment: false,
            };
            Ok(MutationPlan {
                statement: Statement {
                    sql,
                    params: Vec::new(),
                    expect: RowExpectation::Unchecked,
                },
                applied: Applied::ColumnAdded { column, fill },
            })
        }

        PendingIntent::RemoveColumn { name } => {
            let schema = schema.ok_or(SyncError::NoTableSelected)?;
            let column = schema.column(name).ok_or_else(|| {
                SyncError::Validation(format!("'{}' has no column '{}'", schema.table, name))
            })?;
            if column.primary_key {
                return Err(SyncError::Validation(format!(
                    "column '{}' is part of the primary key and cannot be removed",
                    name
                )));
            }
            if schema.columns.len() == 1 {
                return Err(SyncError::Validation(format!(
                    "'{}' is the only column of '{}'",
                    name, schema.table
                )));
            }
            let sql = format!(
                "ALTER TABLE {} DROP COLUMN {}",
                q(&schema.table),
                q(&column.name)
            );
            Ok(MutationPlan {
                statement: Statement {
                    sql,
                    params: Vec::new(),
                    expect: RowExpectation::Unchecked,
                },
                applied: Applied::ColumnRemoved {
                    name: column.name.to_string(),
                },
            })
        }

        PendingIntent::RenameTable { old, new } => {
            let old = Identifier::parse(old)?;
            let new = Identifier::parse(new)?;
            if old == new {
                return Err(SyncError::Validation(format!(
                    "'{}' already has that name",
                    old
                )));
            }
            let sql = format!("ALTER TABLE {} RENAME TO {}", q(&old), q(&new));
            Ok(ddl(sql, Applied::TableRenamed { old, new }))
        }

        PendingIntent::DropTable { name } => {
            let name = Identifier::parse(name)?;
            let sql = format!("DROP TABLE {}", q(&name));
            Ok(ddl(sql, Applied::TableDropped { name }))
        }

        PendingIntent::CreateTable { name } => {
            let name = Identifier::parse(name)?;
            let key = Identifier::parse(CREATED_TABLE_KEY)?;
            let sql = format!(
                "CREATE TABLE {} ({})",
                q(&name),
                dialect.auto_increment_primary_key(&key)
            );
            Ok(ddl(sql, Applied::TableCreated { name }))
        }
    }
}

fn ddl(sql: String, applied: Applied) -> MutationPlan {
    MutationPlan {
        statement: Statement {
            sql,
            params: Vec::new(),
            expect: RowExpectation::Unchecked,
        },
        applied,
    }
}

/// `WHERE` clause addressing exactly the row behind `key`; appends the key
/// values to `params`.
fn key_predicate(
    dialect: SqlDialect,
    schema: &TableSchema,
    key: &RowKey,
    params: &mut Vec<Value>,
) -> SyncResult<String> {
    if !schema.has_primary_key() {
        return Err(SyncError::Validation(format!(
            "'{}' has no primary key; its rows cannot be edited or deleted individually",
            schema.table
        )));
    }
    if !key.matches(schema) {
        return Err(SyncError::StaleReference(format!(
            "row key ({}) does not match the primary key of '{}'",
            key, schema.table
        )));
    }

    let mut clauses = Vec::with_capacity(schema.primary_key.len());
    for key_column in &schema.primary_key {
        let value = key
            .get(key_column.as_str())
            .cloned()
            .unwrap_or(Value::Null);
        let value = match schema.column(key_column.as_str()) {
            Some(column) => column.column_type.coerce(value)?,
            None => value,
        };
        clauses.push(format!("{} = {}", dialect.quote(key_column), dialect.placeholder()));
        params.push(value);
    }
    Ok(clauses.join(" AND "))
}
