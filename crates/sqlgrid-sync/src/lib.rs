//! SQLGRID Sync Engine
//!
//! Keeps an editable in-memory grid consistent with one table of a
//! relational store and turns grid edits into transactional store mutations.
//!
//! # Architecture
//!
//! ```text
//! Rendering side (sqlgrid-cli, or any UI)
//!     ↓ SyncCommand          ↑ SyncEvent
//! SyncCoordinator ← This crate
//!     ↓
//! SchemaInspector / RefreshLoop / MutationTranslator → GridModel
//!     ↓
//! Connection (sqlgrid-core, sqlgrid-drivers)
//! ```
//!
//! # Components
//!
//! - [`SchemaInspector`] - Reads column layout and primary key of a table
//! - [`GridModel`] - In-memory rows keyed by primary key
//! - [`MutationTranslator`] - Intent to parameterized statement, in a transaction
//! - [`RefreshLoop`] - Authoritative re-read and drift detection
//! - [`SyncCoordinator`] - Selection state machine and the async run loop
//!
//! # Principles
//!
//! 1. **Bind every value** - only validated identifiers reach statement text
//! 2. **Store first** - the grid is patched only after the store confirms
//! 3. **One session** - refreshes and mutations never overlap

mod config;
mod coordinator;
mod defaults;
mod error;
mod grid;
mod inspector;
mod intent;
mod refresh;
mod schema;
mod timeout;
mod translator;

pub use config::SyncConfig;
pub use coordinator::{SelectionState, SyncCommand, SyncCoordinator, SyncEvent};
pub use defaults::{DefaultLiteral, DefaultPolicy, DefaultSpec};
pub use error::{SyncError, SyncResult};
pub use grid::{GridModel, GridRow, GridSnapshot, RowKey};
pub use inspector::SchemaInspector;
pub use intent::PendingIntent;
pub use refresh::{RefreshLoop, RefreshOutcome};
pub use schema::{Column, ColumnType, ColumnTypeKind, SchemaDrift, TableSchema};
pub use translator::{Applied, MutationPlan, MutationTranslator, RowExpectation, Statement};

// Re-export the store-facing types callers need alongside the engine
pub use sqlgrid_core::{Connection, Identifier, TableInfo, Value};
