//! Schema catalog
//!
//! The catalog is the compile-time registry of exportable tables: a
//! table-name to descriptor mapping built once at startup. Each descriptor
//! lists the persisted columns with their typed accessors and protection
//! purposes. Tables without a descriptor, migration history and cache tables
//! are never exported.

use std::collections::{BTreeMap, HashSet};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{BackupError, BackupResult};

use super::value::ColumnKind;

/// Tables that are never part of a backup, even if a descriptor exists
pub const EXCLUDED_TABLES: &[&str] = &["__migrations", "url_lookup_cache"];

/// Describes one field of a record type and the column it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: &'static str,
    pub field: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Derived and navigation fields are not persisted and never mapped
    pub persisted: bool,
    pub protection: Option<&'static str>,
}

impl ColumnDescriptor {
    /// A persisted, non-null column
    pub const fn new(name: &'static str, field: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            field,
            kind,
            nullable: false,
            persisted: true,
            protection: None,
        }
    }

    /// A field computed from other fields or navigating to another record
    pub const fn derived(field: &'static str) -> Self {
        Self {
            name: "",
            field,
            kind: ColumnKind::Text,
            nullable: true,
            persisted: false,
            protection: None,
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    /// Mark the column as encrypted at rest under `purpose`
    pub const fn protected(self, purpose: &'static str) -> Self {
        Self {
            protection: Some(purpose),
            ..self
        }
    }
}

/// Describes one exportable table and its record type
#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub record: &'static str,
    pub primary_key: Option<&'static str>,
    /// Primary key is generated by an AUTOINCREMENT sequence
    pub sequence: bool,
    pub columns: &'static [ColumnDescriptor],
}

/// One entry of a table's column mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column_name: &'static str,
    pub field_name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub is_protected: bool,
    pub protection_purpose: Option<&'static str>,
}

impl TableDescriptor {
    /// Ordered column mapping; derived fields are omitted
    pub fn mapping(&self) -> Vec<ColumnMapping> {
        self.columns
            .iter()
            .filter(|c| c.persisted)
            .map(|c| ColumnMapping {
                column_name: c.name,
                field_name: c.field,
                kind: c.kind,
                nullable: c.nullable,
                is_protected: c.protection.is_some(),
                protection_purpose: c.protection,
            })
            .collect()
    }

    /// Column used to order exported rows: primary key, then `created_at`,
    /// then the first mapped column
    pub fn order_column(&self) -> Option<&'static str> {
        let mapping = self.mapping();
        self.primary_key
            .or_else(|| {
                mapping
                    .iter()
                    .find(|m| m.column_name == "created_at")
                    .map(|m| m.column_name)
            })
            .or_else(|| mapping.first().map(|m| m.column_name))
    }
}

/// An exportable table as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportableTable {
    pub table_name: &'static str,
    pub record_type: &'static str,
}

/// Registry of exportable tables
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    tables: BTreeMap<&'static str, &'static TableDescriptor>,
}

impl SchemaCatalog {
    /// Build a catalog from a set of descriptors
    pub fn new(descriptors: &'static [TableDescriptor]) -> Self {
        let tables = descriptors
            .iter()
            .filter(|d| !is_excluded(d.name))
            .map(|d| (d.name, d))
            .collect();
        Self { tables }
    }

    /// The catalog of the application schema
    pub fn application() -> Self {
        Self::new(super::tables::APPLICATION_TABLES)
    }

    /// All registered tables, ordered by name
    pub fn list_exportable_tables(&self) -> Vec<ExportableTable> {
        self.tables
            .values()
            .map(|d| ExportableTable {
                table_name: d.name,
                record_type: d.record,
            })
            .collect()
    }

    pub fn descriptor(&self, table: &str) -> Option<&'static TableDescriptor> {
        self.tables.get(table).copied()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Registered tables that exist in the connected database, ordered by
    /// name, with every mapped column verified against the live schema
    pub fn discover(&self, conn: &Connection) -> BackupResult<Vec<&'static TableDescriptor>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut found = Vec::new();
        for name in &existing {
            if is_excluded(name) {
                debug!(table = %name, "Skipping excluded table");
                continue;
            }
            match self.descriptor(name) {
                Some(descriptor) => {
                    verify_columns(conn, descriptor)?;
                    found.push(descriptor);
                }
                None => debug!(table = %name, "Skipping table without a registered mapping"),
            }
        }

        Ok(found)
    }
}

/// Check whether a table is excluded from backups
pub fn is_excluded(table: &str) -> bool {
    EXCLUDED_TABLES.contains(&table) || table.starts_with("sqlite_")
}

/// Verify every mapped column of `descriptor` exists in the live table
pub fn verify_columns(conn: &Connection, descriptor: &TableDescriptor) -> BackupResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(descriptor.name)))?;
    let columns: HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    let missing: Vec<&str> = descriptor
        .mapping()
        .iter()
        .map(|m| m.column_name)
        .filter(|c| !columns.contains(*c))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BackupError::Configuration(format!(
            "Table '{}' is missing mapped column(s): {}",
            descriptor.name,
            missing.join(", ")
        )))
    }
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
