//! User intents the coordinator consumes

use indexmap::IndexMap;
use sqlgrid_core::Value;

use crate::grid::RowKey;

/// One user-initiated change, consumed as soon as it arrives
#[derive(Debug, Clone, PartialEq)]
pub enum PendingIntent {
    EditCell {
        row: RowKey,
        column: String,
        value: Value,
    },
    /// Values keyed by column; columns left out take their store-side default
    AddRow { values: IndexMap<String, Value> },
    DeleteRow { row: RowKey },
    AddColumn {
        name: String,
        column_type: String,
        /// `None` picks the default from the policy table
        default: Option<Value>,
    },
    RemoveColumn { name: String },
    RenameTable { old: String, new: String },
    DropTable { name: String },
    CreateTable { name: String },
}

impl PendingIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingIntent::EditCell { .. } => "edit_cell",
            PendingIntent::AddRow { .. } => "add_row",
            PendingIntent::DeleteRow { .. } => "delete_row",
            PendingIntent::AddColumn { .. } => "add_column",
            PendingIntent::RemoveColumn { .. } => "remove_column",
            PendingIntent::RenameTable { .. } => "rename_table",
            PendingIntent::DropTable { .. } => "drop_table",
            PendingIntent::CreateTable { .. } => "create_table",
        }
    }

    /// Intents that act on the currently selected table
    pub fn needs_selection(&self) -> bool {
        matches!(
            self,
            PendingIntent::EditCell { .. }
                | PendingIntent::AddRow { .. }
                | PendingIntent::DeleteRow { .. }
                | PendingIntent::AddColumn { .. }
                | PendingIntent::RemoveColumn { .. }
        )
    }

    /// Intents that change the set of tables
    pub fn changes_table_list(&self) -> bool {
        matches!(
            self,
            PendingIntent::RenameTable { .. }
                | PendingIntent::DropTable { .. }
                | PendingIntent::CreateTable { .. }
        )
    }
}
