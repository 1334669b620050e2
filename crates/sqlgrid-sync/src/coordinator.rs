//! The sync coordinator owns the session, the grid and the selection.
//!
//! Commands and refresh ticks are handled one at a time on the coordinator's
//! task, so a mutation and a refresh never overlap on the session. Every
//! outcome is reported as a list of [`SyncEvent`]s; errors are surfaced, never
//! retried.

use sqlgrid_core::{Connection, Identifier, TableInfo};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::grid::{GridModel, GridSnapshot};
use crate::intent::PendingIntent;
use crate::refresh::{RefreshLoop, RefreshOutcome};
use crate::schema::SchemaDrift;
use crate::translator::{Applied, MutationTranslator};
use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    NoTableSelected,
    TableSelected(Identifier),
    /// A refresh of this table is in flight
    Refreshing(Identifier),
}

impl SelectionState {
    pub fn table(&self) -> Option<&Identifier> {
        match self {
            SelectionState::NoTableSelected => None,
            SelectionState::TableSelected(t) | SelectionState::Refreshing(t) => Some(t),
        }
    }
}

/// Input from the rendering side
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    SelectTable(String),
    Apply(PendingIntent),
    /// A cell editor opened; periodic refreshes hold off until it closes
    EditStarted,
    EditCancelled,
    Refresh,
    ListTables,
}

/// Output to the rendering side
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Snapshot(GridSnapshot),
    Tables(Vec<TableInfo>),
    SchemaDrift { table: String, drift: SchemaDrift },
    SelectionInvalidated { table: String },
    Notice(String),
    Error(SyncError),
}

impl SyncEvent {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncEvent::Error(e) if e.is_fatal())
    }
}

pub struct SyncCoordinator {
    conn: Arc<dyn Connection>,
    config: SyncConfig,
    translator: MutationTranslator,
    refresher: RefreshLoop,
    grid: GridModel,
    state: SelectionState,
    edit_hold: Option<Instant>,
}

impl SyncCoordinator {
    pub fn new(conn: Arc<dyn Connection>, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let translator = MutationTranslator::new(conn.clone(), config.defaults.clone())
            .with_statement_timeout(config.statement_timeout());
        let refresher = RefreshLoop::new(conn.clone(), &config);
        Ok(Self {
            conn,
            config,
            translator,
            refresher,
            grid: GridModel::new(),
            state: SelectionState::NoTableSelected,
            edit_hold: None,
        })
    }

    pub fn grid(&self) -> &GridModel {
        &self.grid
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn selected_table(&self) -> Option<&Identifier> {
        self.state.table()
    }

    pub fn is_edit_held(&self) -> bool {
        self.edit_hold.is_some()
    }

    /// Handle one command to completion
    #[tracing::instrument(skip_all, fields(command = command_name(&command)))]
    pub async fn handle(&mut self, command: SyncCommand) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        let result = match command {
            SyncCommand::SelectTable(name) => self.select_table(&name, &mut events).await,
            SyncCommand::Apply(intent) => self.apply(intent, &mut events).await,
            SyncCommand::EditStarted => {
                self.edit_hold = Some(Instant::now());
                Ok(())
            }
            SyncCommand::EditCancelled => {
                self.edit_hold = None;
                Ok(())
            }
            SyncCommand::Refresh => {
                if self.selected_table().is_none() {
                    Err(SyncError::NoTableSelected)
                } else {
                    self.refresh_selected(&mut events, true).await
                }
            }
            SyncCommand::ListTables => self.list_tables(&mut events).await,
        };
        if let Err(e) = result {
            self.fail(e, &mut events).await;
        }
        events
    }

    /// One periodic refresh; skipped while an edit holds the grid
    pub async fn tick(&mut self) -> Vec<SyncEvent> {
        if let Some(since) = self.edit_hold {
            if since.elapsed() < self.config.edit_hold_timeout() {
                tracing::trace!("cell editor open, refresh held");
                return Vec::new();
            }
            tracing::debug!("edit hold expired");
            self.edit_hold = None;
        }

        let mut events = Vec::new();
        if let Err(e) = self.refresh_selected(&mut events, false).await {
            self.fail(e, &mut events).await;
        }
        events
    }

    /// Drive the coordinator until cancelled, the command channel closes, or
    /// the session fails.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SyncCommand>,
        events: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> SyncResult<()> {
        tracing::info!(
            driver = self.conn.driver_name(),
            refresh_interval_ms = self.config.refresh_interval_ms,
            "sync coordinator started"
        );

        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        let mut outcome = Ok(());
        let mut batch = self.handle(SyncCommand::ListTables).await;
        loop {
            let fatal = batch.iter().find_map(|event| match event {
                SyncEvent::Error(e) if e.is_fatal() => Some(e.clone()),
                _ => None,
            });
            let mut receiver_gone = false;
            for event in batch.drain(..) {
                if events.send(event).await.is_err() {
                    receiver_gone = true;
                    break;
                }
            }
            if let Some(err) = fatal {
                tracing::error!(error = %err, "session lost, stopping");
                outcome = Err(err);
                break;
            }
            if receiver_gone {
                tracing::info!("event receiver dropped, stopping");
                break;
            }

            batch = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("sync coordinator shutting down");
                    break;
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("command channel closed, stopping");
                        break;
                    };
                    self.handle(command).await
                }

                _ = ticker.tick() => self.tick().await,
            };
        }

        if let Err(e) = self.conn.close().await {
            tracing::warn!(error = %e, "failed to close session");
        }
        outcome
    }

    async fn select_table(&mut self, name: &str, events: &mut Vec<SyncEvent>) -> SyncResult<()> {
        let table = Identifier::parse(name)?;
        self.edit_hold = None;
        self.state = SelectionState::Refreshing(table.clone());

        match self.refresher.load(&table, &mut self.grid).await {
            Ok(_) => {
                self.state = SelectionState::TableSelected(table);
                events.push(SyncEvent::Snapshot(self.grid.snapshot()));
                Ok(())
            }
            Err(e) => {
                self.deselect();
                events.push(SyncEvent::Snapshot(self.grid.snapshot()));
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(intent = intent.kind()))]
    async fn apply(&mut self, intent: PendingIntent, events: &mut Vec<SyncEvent>) -> SyncResult<()> {
        if matches!(intent, PendingIntent::EditCell { .. }) {
            self.edit_hold = None;
        }
        if intent.needs_selection() && self.grid.schema().is_none() {
            return Err(SyncError::NoTableSelected);
        }

        let applied = self.translator.apply(&intent, self.grid.schema()).await?;
        tracing::info!(notice = %applied.describe(), "mutation applied");
        events.push(SyncEvent::Notice(applied.describe()));

        self.patch(&applied, events);
        self.refresh_selected(events, true).await?;
        if intent.changes_table_list() {
            self.list_tables(events).await?;
        }
        Ok(())
    }

    /// Mirror a confirmed mutation into the grid ahead of the refresh
    fn patch(&mut self, applied: &Applied, events: &mut Vec<SyncEvent>) {
        let result = match applied {
            Applied::CellUpdated { row, column, value } => {
                self.grid.patch_cell(row, column, value.clone())
            }
            Applied::RowDeleted { row } => self.grid.remove_row(row).map(|_| ()),
            Applied::ColumnAdded { column, fill } => {
                self.grid.insert_column(column.clone(), fill.clone())
            }
            Applied::ColumnRemoved { name } => self.grid.remove_column(name).map(|_| ()),
            Applied::TableRenamed { old, new } if self.selected_table() == Some(old) => {
                self.state = SelectionState::TableSelected(new.clone());
                self.grid.rename_table(new.clone())
            }
            Applied::TableDropped { name } if self.selected_table() == Some(name) => {
                self.deselect();
                events.push(SyncEvent::SelectionInvalidated {
                    table: name.to_string(),
                });
                events.push(SyncEvent::Snapshot(self.grid.snapshot()));
                Ok(())
            }
            // New rows get their key from the store; the refresh brings them in
            Applied::RowInserted { .. }
            | Applied::TableRenamed { .. }
            | Applied::TableDropped { .. }
            | Applied::TableCreated { .. } => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "grid patch failed, relying on refresh");
        }
    }

    /// Re-read the selected table. `always_snapshot` emits a snapshot even
    /// when nothing changed, which post-mutation and explicit refreshes need.
    async fn refresh_selected(
        &mut self,
        events: &mut Vec<SyncEvent>,
        always_snapshot: bool,
    ) -> SyncResult<()> {
        let Some(table) = self.selected_table().cloned() else {
            return Ok(());
        };
        self.state = SelectionState::Refreshing(table.clone());

        let outcome = match self.refresher.refresh(&mut self.grid).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, SyncError::IntrospectionFailed { .. }) {
                    self.deselect();
                    events.push(SyncEvent::Snapshot(self.grid.snapshot()));
                } else {
                    self.state = SelectionState::TableSelected(table);
                }
                return Err(e);
            }
        };

        match outcome {
            RefreshOutcome::Idle => {
                self.state = SelectionState::NoTableSelected;
            }
            RefreshOutcome::Unchanged => {
                self.state = SelectionState::TableSelected(table);
                if always_snapshot {
                    events.push(SyncEvent::Snapshot(self.grid.snapshot()));
                }
            }
            RefreshOutcome::Refreshed { drift, row_count } => {
                tracing::debug!(table = %table, row_count, "grid refreshed");
                if let Some(drift) = drift {
                    events.push(SyncEvent::SchemaDrift {
                        table: table.to_string(),
                        drift,
                    });
                }
                self.state = SelectionState::TableSelected(table);
                events.push(SyncEvent::Snapshot(self.grid.snapshot()));
            }
            RefreshOutcome::SelectionInvalidated { table } => {
                self.deselect();
                events.push(SyncEvent::SelectionInvalidated {
                    table: table.to_string(),
                });
                events.push(SyncEvent::Snapshot(self.grid.snapshot()));
                self.list_tables(events).await?;
            }
        }
        Ok(())
    }

    async fn list_tables(&mut self, events: &mut Vec<SyncEvent>) -> SyncResult<()> {
        let tables = self.refresher.inspector().list_tables().await?;
        events.push(SyncEvent::Tables(tables));
        Ok(())
    }

    fn deselect(&mut self) {
        self.grid.clear();
        self.state = SelectionState::NoTableSelected;
        self.edit_hold = None;
    }

    /// Report `err` and, when the grid may be out of step, refresh once
    async fn fail(&mut self, err: SyncError, events: &mut Vec<SyncEvent>) {
        tracing::warn!(error = %err, kind = err.kind(), "command failed");
        let corrective = err.needs_refresh() && self.selected_table().is_some();
        events.push(SyncEvent::Error(err));
        if !corrective {
            return;
        }
        if let Err(e) = self.refresh_selected(events, true).await {
            tracing::warn!(error = %e, "corrective refresh failed");
            events.push(SyncEvent::Error(e));
        }
    }
}

fn command_name(command: &SyncCommand) -> &'static str {
    match command {
        SyncCommand::SelectTable(_) => "select_table",
        SyncCommand::Apply(intent) => intent.kind(),
        SyncCommand::EditStarted => "edit_started",
        SyncCommand::EditCancelled => "edit_cancelled",
        SyncCommand::Refresh => "refresh",
        SyncCommand::ListTables => "list_tables",
    }
}
