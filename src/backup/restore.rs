//! Restore engine
//!
//! Replaces the contents of every managed table with an archive's tables
//! inside one exclusive transaction:
//!
//! 1. wipe all managed tables in reverse load order
//! 2. load archived tables in load order, protecting sensitive columns
//!    with this host's keys as each row is inserted
//! 3. reset `AUTOINCREMENT` sequences to the restored maximum
//! 4. check foreign keys table by table, then commit
//!
//! Foreign keys are deferred for the transaction, so self-referencing rows
//! load in any order. Any error drops the transaction and the database is
//! left exactly as it was.

use std::collections::HashMap;
use std::io::Read;

use rusqlite::{params, params_from_iter, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{BackupError, BackupResult};
use crate::schema::{quote_ident, ColumnMapping, Row, SchemaCatalog, TableDescriptor, Value};

use super::archive::{ArchiveMetadata, ArchiveReader};
use super::dependency::{edges_from_database, DependencyResolver, LoadOrder};
use super::field_protection::FieldProtectionBridge;

/// Default number of rows inserted between cancellation checks
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Where a restore currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    Wiping,
    /// Inserting rows; protected columns are re-encrypted here
    Loading,
    SequenceReset,
    /// Checking foreign keys before commit
    Validating,
    Committed,
    RolledBack,
}

/// Rows restored into one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRestoreStats {
    pub table: String,
    pub rows: u64,
}

/// Result of a committed restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub metadata: ArchiveMetadata,
    /// In load order
    pub tables: Vec<TableRestoreStats>,
    pub sequences_reset: usize,
    pub fields_reencrypted: u64,
    pub self_referencing: Vec<String>,
}

impl RestoreReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn rows_for(&self, table: &str) -> Option<u64> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }

    /// Get a summary of what was restored
    pub fn summary(&self) -> String {
        format!(
            "Restored {} rows into {} tables ({} sequences reset, {} protected fields re-encrypted)",
            self.total_rows(),
            self.tables.len(),
            self.sequences_reset,
            self.fields_reencrypted
        )
    }
}

pub struct RestoreEngine<'a> {
    catalog: &'a SchemaCatalog,
    bridge: &'a FieldProtectionBridge,
    batch_size: usize,
    cancel: CancellationToken,
    phase: RestorePhase,
}

struct Plan {
    tables: Vec<&'static TableDescriptor>,
    order: LoadOrder,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(catalog: &'a SchemaCatalog, bridge: &'a FieldProtectionBridge) -> Self {
        Self {
            catalog,
            bridge,
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationToken::new(),
            phase: RestorePhase::Idle,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> RestorePhase {
        self.phase
    }

    /// Replace the database contents with the archive
    #[tracing::instrument(skip_all, fields(tables = reader.metadata().table_count))]
    pub fn apply<R: Read>(
        &mut self,
        conn: &mut Connection,
        reader: ArchiveReader<R>,
    ) -> BackupResult<RestoreReport> {
        self.phase = RestorePhase::Idle;

        // Nothing destructive happens until the plan is known to fit the archive
        let plan = self.plan(conn, reader.metadata())?;

        match self.run(conn, reader, &plan) {
            Ok(report) => {
                self.phase = RestorePhase::Committed;
                info!(
                    rows = report.total_rows(),
                    sequences = report.sequences_reset,
                    "Restore committed"
                );
                Ok(report)
            }
            Err(e) => {
                if self.phase != RestorePhase::Idle {
                    warn!(phase = ?self.phase, error = %e, "Restore rolled back");
                    self.phase = RestorePhase::RolledBack;
                }
                Err(e)
            }
        }
    }

    fn plan(&self, conn: &Connection, metadata: &ArchiveMetadata) -> BackupResult<Plan> {
        let tables = self.catalog.discover(conn)?;

        for name in &metadata.tables {
            if !tables.iter().any(|t| t.name == name) {
                return Err(BackupError::Format(format!(
                    "Archive contains table '{}' which is not a managed table of this database",
                    name
                )));
            }
        }

        let names: Vec<String> = tables.iter().map(|t| t.name.to_string()).collect();
        let edges = edges_from_database(conn, &tables)?;
        let order = DependencyResolver::order(&names, &edges)?;

        Ok(Plan { tables, order })
    }

    fn run<R: Read>(
        &mut self,
        conn: &mut Connection,
        mut reader: ArchiveReader<R>,
        plan: &Plan,
    ) -> BackupResult<RestoreReport> {
        self.cancel.check()?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        tx.pragma_update(None, "defer_foreign_keys", true)?;

        self.phase = RestorePhase::Wiping;
        for table in plan.order.wipe_order() {
            tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])
                .map_err(|e| BackupError::restore_failure(table, e))?;
        }
        debug!(tables = plan.order.tables.len(), "Wiped managed tables");

        self.phase = RestorePhase::Loading;
        let metadata = reader.metadata().clone();
        let mut pending: HashMap<String, Vec<Row>> = HashMap::new();
        let mut stats = Vec::new();
        let mut fields_reencrypted = 0;

        for name in &plan.order.tables {
            if !metadata.tables.contains(name) {
                debug!(table = %name, "Table not in archive, left empty");
                continue;
            }
            let descriptor = plan.descriptor(name)?;
            let mut loader = TableLoader::new(&tx, descriptor, self.bridge)?;

            if let Some(rows) = pending.remove(name) {
                for chunk in rows.chunks(self.batch_size) {
                    self.cancel.check()?;
                    loader.insert_all(chunk.iter().cloned())?;
                }
            } else {
                loop {
                    match reader.next_table()? {
                        Some(table) if &table == name => break,
                        Some(table) => {
                            let rows = drain_table(&mut reader)?;
                            debug!(
                                table = %table,
                                rows = rows.len(),
                                "Buffered out-of-order table"
                            );
                            pending.insert(table, rows);
                        }
                        None => {
                            return Err(BackupError::Format(format!(
                                "Archive data is missing table '{}'",
                                name
                            )))
                        }
                    }
                }
                loop {
                    self.cancel.check()?;
                    let batch = reader.read_rows(self.batch_size)?;
                    if batch.is_empty() {
                        break;
                    }
                    loader.insert_all(batch.into_iter())?;
                }
            }

            debug!(table = %name, rows = loader.rows, "Loaded table");
            fields_reencrypted += loader.reencrypted;
            stats.push(TableRestoreStats {
                table: name.clone(),
                rows: loader.rows,
            });
        }

        if let Some(extra) = reader.next_table()? {
            return Err(BackupError::Format(format!(
                "Archive data holds unexpected table '{}'",
                extra
            )));
        }

        self.phase = RestorePhase::SequenceReset;
        let mut sequences_reset = 0;
        for descriptor in plan.tables.iter().filter(|t| t.sequence) {
            reset_sequence(&tx, descriptor)?;
            sequences_reset += 1;
        }

        self.phase = RestorePhase::Validating;
        for name in &plan.order.tables {
            check_foreign_keys(&tx, name)?;
        }

        self.cancel.check()?;
        tx.commit()?;

        Ok(RestoreReport {
            metadata,
            tables: stats,
            sequences_reset,
            fields_reencrypted,
            self_referencing: plan.order.self_referencing.iter().cloned().collect(),
        })
    }
}

impl Plan {
    fn descriptor(&self, name: &str) -> BackupResult<&'static TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .copied()
            .ok_or_else(|| BackupError::restore_failure(name, "table has no registered mapping"))
    }
}

/// Inserts archived rows into one table
struct TableLoader<'t> {
    stmt: rusqlite::Statement<'t>,
    table: &'static TableDescriptor,
    mapping: Vec<ColumnMapping>,
    bridge: &'t FieldProtectionBridge,
    rows: u64,
    reencrypted: u64,
}

impl<'t> TableLoader<'t> {
    fn new(
        tx: &'t Transaction<'_>,
        table: &'static TableDescriptor,
        bridge: &'t FieldProtectionBridge,
    ) -> BackupResult<Self> {
        let mapping = table.mapping();
        let columns: Vec<String> = mapping.iter().map(|m| quote_ident(m.column_name)).collect();
        let placeholders: Vec<String> = (1..=mapping.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        let stmt = tx
            .prepare(&sql)
            .map_err(|e| BackupError::restore_failure(table.name, e))?;

        Ok(Self {
            stmt,
            table,
            mapping,
            bridge,
            rows: 0,
            reencrypted: 0,
        })
    }

    fn insert_all<I: Iterator<Item = Row>>(&mut self, rows: I) -> BackupResult<()> {
        for row in rows {
            let row = self.prepare_row(row)?;
            self.stmt
                .execute(params_from_iter(row.iter()))
                .map_err(|e| BackupError::restore_failure(self.table.name, e))?;
            self.rows += 1;
        }
        Ok(())
    }

    fn prepare_row(&mut self, row: Row) -> BackupResult<Row> {
        if row.len() != self.mapping.len() {
            return Err(BackupError::Format(format!(
                "Row {} of table '{}' has {} values, expected {}",
                self.rows + 1,
                self.table.name,
                row.len(),
                self.mapping.len()
            )));
        }

        let mut prepared = Vec::with_capacity(row.len());
        for (value, column) in row.into_iter().zip(&self.mapping) {
            column
                .kind
                .check(column.column_name, column.nullable, &value)
                .map_err(|e| match e {
                    BackupError::Format(msg) => {
                        BackupError::Format(format!("Table '{}': {}", self.table.name, msg))
                    }
                    other => other,
                })?;

            let value = match (column.protection_purpose, value) {
                (Some(purpose), Value::Text(plain)) => {
                    let protected = self
                        .bridge
                        .encrypt_for_import(&plain, purpose)
                        .map_err(|e| BackupError::restore_failure(self.table.name, e))?;
                    self.reencrypted += 1;
                    Value::Text(protected)
                }
                (_, value) => value,
            };
            prepared.push(value);
        }
        Ok(prepared)
    }
}

fn drain_table<R: Read>(reader: &mut ArchiveReader<R>) -> BackupResult<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = reader.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Point the table's sequence at the restored maximum; an empty table
/// restarts at 1
fn reset_sequence(tx: &Transaction<'_>, table: &TableDescriptor) -> BackupResult<()> {
    let Some(pk) = table.primary_key else {
        return Ok(());
    };

    let max: Option<i64> = tx
        .query_row(
            &format!("SELECT MAX({}) FROM {}", quote_ident(pk), quote_ident(table.name)),
            [],
            |row| row.get(0),
        )
        .map_err(|e| BackupError::restore_failure(table.name, e))?;

    tx.execute("DELETE FROM sqlite_sequence WHERE name = ?1", params![table.name])
        .map_err(|e| BackupError::restore_failure(table.name, e))?;
    if let Some(max) = max {
        tx.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table.name, max],
        )
        .map_err(|e| BackupError::restore_failure(table.name, e))?;
    }

    debug!(table = table.name, max = ?max, "Reset sequence");
    Ok(())
}

fn check_foreign_keys(tx: &Transaction<'_>, table: &str) -> BackupResult<()> {
    let mut stmt = tx.prepare(&format!("PRAGMA foreign_key_check({})", quote_ident(table)))?;
    let mut rows = stmt.query([])?;

    let mut violations = 0;
    let mut referenced = None;
    while let Some(row) = rows.next()? {
        violations += 1;
        if referenced.is_none() {
            referenced = row.get::<_, String>(2).ok();
        }
    }

    if violations == 0 {
        return Ok(());
    }
    Err(BackupError::restore_failure(
        table,
        format!(
            "{} row(s) violate a foreign key to '{}'",
            violations,
            referenced.unwrap_or_default()
        ),
    ))
}
