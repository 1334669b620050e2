//! JSON-lines wire format between the binary and whatever drives it
//!
//! One command object per input line, tagged by `"command"`; one event object
//! per output line, tagged by `"event"`. Row keys travel as objects mapping key
//! column to value, e.g. `{"id": 1}`.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::json;
use sqlgrid_core::Value;
use sqlgrid_sync::{GridSnapshot, PendingIntent, RowKey, SyncCommand, SyncEvent};

type JsonMap = IndexMap<String, serde_json::Value>;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum WireCommand {
    SelectTable {
        table: String,
    },
    ListTables,
    Refresh,
    EditStarted,
    EditCancelled,
    EditCell {
        row: JsonMap,
        column: String,
        value: serde_json::Value,
    },
    AddRow {
        #[serde(default)]
        values: JsonMap,
    },
    DeleteRow {
        row: JsonMap,
    },
    AddColumn {
        name: String,
        #[serde(rename = "type")]
        column_type: String,
        /// Absent or `null` picks the configured default for the type
        #[serde(default)]
        default: Option<serde_json::Value>,
    },
    RemoveColumn {
        name: String,
    },
    RenameTable {
        old: String,
        new: String,
    },
    DropTable {
        name: String,
    },
    CreateTable {
        name: String,
    },
}

/// Decode one input line
pub fn parse_command(line: &str) -> Result<SyncCommand, String> {
    let wire: WireCommand =
        serde_json::from_str(line).map_err(|e| format!("unreadable command: {}", e))?;

    let command = match wire {
        WireCommand::SelectTable { table } => SyncCommand::SelectTable(table),
        WireCommand::ListTables => SyncCommand::ListTables,
        WireCommand::Refresh => SyncCommand::Refresh,
        WireCommand::EditStarted => SyncCommand::EditStarted,
        WireCommand::EditCancelled => SyncCommand::EditCancelled,
        WireCommand::EditCell { row, column, value } => {
            SyncCommand::Apply(PendingIntent::EditCell {
                row: row_key(row)?,
                column,
                value: Value::from_json(&value),
            })
        }
        WireCommand::AddRow { values } => SyncCommand::Apply(PendingIntent::AddRow {
            values: values
                .into_iter()
                .map(|(column, value)| (column, Value::from_json(&value)))
                .collect(),
        }),
        WireCommand::DeleteRow { row } => {
            SyncCommand::Apply(PendingIntent::DeleteRow { row: row_key(row)? })
        }
        WireCommand::AddColumn {
            name,
            column_type,
            default,
        } => SyncCommand::Apply(PendingIntent::AddColumn {
            name,
            column_type,
            default: default
                .filter(|v| !v.is_null())
                .map(|v| Value::from_json(&v)),
        }),
        WireCommand::RemoveColumn { name } => {
            SyncCommand::Apply(PendingIntent::RemoveColumn { name })
        }
        WireCommand::RenameTable { old, new } => {
            SyncCommand::Apply(PendingIntent::RenameTable { old, new })
        }
        WireCommand::DropTable { name } => SyncCommand::Apply(PendingIntent::DropTable { name }),
        WireCommand::CreateTable { name } => {
            SyncCommand::Apply(PendingIntent::CreateTable { name })
        }
    };
    Ok(command)
}

fn row_key(row: JsonMap) -> Result<RowKey, String> {
    RowKey::new(
        row.into_iter()
            .map(|(column, value)| (column, Value::from_json(&value)))
            .collect(),
    )
    .map_err(|e| e.to_string())
}

/// Encode one output line
pub fn encode_event(event: &SyncEvent) -> serde_json::Value {
    match event {
        SyncEvent::Snapshot(snapshot) => encode_snapshot(snapshot),
        SyncEvent::Tables(tables) => json!({
            "event": "tables",
            "tables": tables
                .iter()
                .map(|t| json!({ "name": t.name, "row_count": t.row_count }))
                .collect::<Vec<_>>(),
        }),
        SyncEvent::SchemaDrift { table, drift } => json!({
            "event": "schema_drift",
            "table": table,
            "added": drift.added,
            "removed": drift.removed,
            "retyped": drift.retyped,
            "reordered": drift.reordered,
            "key_changed": drift.key_changed,
        }),
        SyncEvent::SelectionInvalidated { table } => json!({
            "event": "selection_invalidated",
            "table": table,
        }),
        SyncEvent::Notice(message) => json!({
            "event": "notice",
            "message": message,
        }),
        SyncEvent::Error(err) => json!({
            "event": "error",
            "kind": err.kind(),
            "message": err.to_string(),
            "fatal": err.is_fatal(),
        }),
    }
}

fn encode_snapshot(snapshot: &GridSnapshot) -> serde_json::Value {
    let columns: Vec<_> = snapshot
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name.as_str(),
                "type": c.raw_type,
                "nullable": c.nullable,
                "primary_key": c.primary_key,
            })
        })
        .collect();
    let rows: Vec<_> = snapshot
        .rows
        .iter()
        .map(|row| {
            let key = row.key.as_ref().map(|key| {
                key.parts()
                    .iter()
                    .map(|(column, value)| (column.clone(), value.to_json()))
                    .collect::<serde_json::Map<_, _>>()
            });
            json!({
                "key": key,
                "values": row.values.iter().map(Value::to_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "event": "snapshot",
        "table": snapshot.table,
        "version": snapshot.version,
        "columns": columns,
        "rows": rows,
    })
}
