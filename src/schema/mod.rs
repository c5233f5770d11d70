//! Schema registry for exportable tables
//!
//! Replaces runtime reflection with explicit, compile-time table
//! descriptors: which tables are backed up, which columns they map, which
//! of those are protected at rest, and how each value is read.

pub mod catalog;
pub mod tables;
pub mod value;

pub use catalog::{
    quote_ident, ColumnDescriptor, ColumnMapping, ExportableTable, SchemaCatalog, TableDescriptor,
};
pub use value::{ColumnKind, Row, Value};
