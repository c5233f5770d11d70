//! Table exporter
//!
//! Reads one table with a single ordered `SELECT` and streams its rows into
//! an [`ArchiveWriter`]. Protected columns are unprotected on the way out.

use std::io::Write;

use rusqlite::Connection;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::BackupResult;
use crate::schema::{quote_ident, ColumnMapping, Row, TableDescriptor, Value};

use super::archive::{ArchiveWriter, TableSnapshot};
use super::field_protection::{ExportedValue, FieldProtectionBridge};

/// Rows between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 500;

/// Counters for one exported table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableExportStats {
    pub table: String,
    pub rows: u64,
    pub protected_fields: u64,
    /// Protected values that could not be decrypted and were exported as-is
    pub passed_through: u64,
}

pub struct TableExporter<'a> {
    bridge: &'a FieldProtectionBridge,
}

impl<'a> TableExporter<'a> {
    pub fn new(bridge: &'a FieldProtectionBridge) -> Self {
        Self { bridge }
    }

    /// Stream every row of `table` into the open archive
    pub fn export_to<W: Write>(
        &self,
        conn: &Connection,
        table: &TableDescriptor,
        writer: &mut ArchiveWriter<W>,
        cancel: &CancellationToken,
    ) -> BackupResult<TableExportStats> {
        writer.begin_table(table.name)?;
        let stats = self.for_each_row(conn, table, cancel, |row| writer.write_row(&row))?;
        writer.end_table()?;
        Ok(stats)
    }

    /// Read every row of `table` into memory
    pub fn export(
        &self,
        conn: &Connection,
        table: &TableDescriptor,
    ) -> BackupResult<TableSnapshot> {
        let mut snapshot = TableSnapshot::new(table.name);
        self.for_each_row(conn, table, &CancellationToken::new(), |row| {
            snapshot.rows.push(row);
            Ok(())
        })?;
        Ok(snapshot)
    }

    fn for_each_row<F>(
        &self,
        conn: &Connection,
        table: &TableDescriptor,
        cancel: &CancellationToken,
        mut emit: F,
    ) -> BackupResult<TableExportStats>
    where
        F: FnMut(Row) -> BackupResult<()>,
    {
        cancel.check()?;

        let mapping = table.mapping();
        let mut stmt = conn.prepare(&select_sql(table, &mapping))?;
        let mut rows = stmt.query([])?;

        let mut stats = TableExportStats {
            table: table.name.to_string(),
            ..Default::default()
        };

        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(mapping.len());
            for (idx, column) in mapping.iter().enumerate() {
                let value = column.kind.read(row, idx)?;
                values.push(self.export_value(column, value, &mut stats));
            }
            emit(values)?;

            stats.rows += 1;
            if stats.rows % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
        }

        debug!(
            table = table.name,
            rows = stats.rows,
            protected = stats.protected_fields,
            "Exported table"
        );
        Ok(stats)
    }

    fn export_value(
        &self,
        column: &ColumnMapping,
        value: Value,
        stats: &mut TableExportStats,
    ) -> Value {
        let Some(purpose) = column.protection_purpose else {
            return value;
        };
        let protected = match value {
            Value::Text(text) => text,
            other => return other,
        };

        stats.protected_fields += 1;
        match self.bridge.decrypt_for_export(&protected, purpose) {
            ExportedValue::Decrypted(plain) => Value::Text(plain),
            ExportedValue::PassedThrough(original) => {
                stats.passed_through += 1;
                Value::Text(original)
            }
        }
    }
}

/// Deterministic `SELECT` over the mapped columns
fn select_sql(table: &TableDescriptor, mapping: &[ColumnMapping]) -> String {
    let columns: Vec<String> = mapping.iter().map(|m| quote_ident(m.column_name)).collect();
    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), quote_ident(table.name));

    if let Some(order) = table.order_column() {
        sql.push_str(&format!(" ORDER BY {}", quote_ident(order)));
        if table.primary_key != Some(order) {
            sql.push_str(", rowid");
        }
    }
    sql
}
