//! Archive codec
//!
//! A plain archive is a length-prefixed metadata block followed by the
//! gzip-compressed table data:
//!
//! ```text
//! u32 BE metadata length | metadata JSON | gzip(table data)
//! ```
//!
//! Table data is JSON lines. Each table is a `{"begin":{..}}` marker, one
//! JSON array per row (positional to the table's column mapping) and an
//! `{"end":{..}}` marker carrying the row count; the stream closes with a
//! `{"finish":{..}}` marker. Metadata can be read without touching the
//! compressed block, and both sides stream one row at a time.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};
use crate::schema::{Row, Value};

/// Archive format version written by this build
pub const FORMAT_VERSION: &str = "2.0";

/// Archive format versions this build can read
pub const SUPPORTED_VERSIONS: &[&str] = &[FORMAT_VERSION];

/// Upper bound on the metadata block
pub const MAX_METADATA_LEN: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Metadata embedded at the front of every archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub version: String,
    /// Unix seconds (UTC)
    pub created_at: i64,
    pub app_version: String,
    pub table_count: usize,
    /// Tables in the order they appear in the data block
    pub tables: Vec<String>,
}

impl ArchiveMetadata {
    /// Metadata for an archive created now
    pub fn new(app_version: impl Into<String>, tables: Vec<String>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            created_at: Utc::now().timestamp(),
            app_version: app_version.into(),
            table_count: tables.len(),
            tables,
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.created_at, 0).single()
    }

    /// Check version support and internal consistency
    pub fn validate(&self) -> BackupResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(BackupError::Format(format!(
                "Unsupported archive version '{}' (supported: {})",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            )));
        }

        if self.table_count != self.tables.len() {
            return Err(BackupError::Format(format!(
                "Archive declares {} tables but lists {}",
                self.table_count,
                self.tables.len()
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.tables.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(BackupError::Format(format!(
                "Table '{}' is listed twice in archive metadata",
                dup
            )));
        }

        Ok(())
    }
}

/// All rows of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub name: String,
    pub rows: Vec<Row>,
}

impl TableSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Marker {
    Begin { table: String },
    End { table: String, rows: u64 },
    Finish { tables: usize },
}

enum Line {
    Row(Row),
    Marker(Marker),
}

/// Streaming archive writer
pub struct ArchiveWriter<W: Write> {
    encoder: GzEncoder<W>,
    expected: Vec<String>,
    written: usize,
    current: Option<(String, u64)>,
}

impl<W: Write> ArchiveWriter<W> {
    /// Write the metadata block and start the compressed data block
    pub fn new(writer: W, metadata: &ArchiveMetadata) -> BackupResult<Self> {
        Self::with_compression(writer, metadata, Compression::default())
    }

    pub fn with_compression(
        mut writer: W,
        metadata: &ArchiveMetadata,
        level: Compression,
    ) -> BackupResult<Self> {
        metadata.validate()?;

        let json = serde_json::to_vec(metadata)?;
        if json.len() > MAX_METADATA_LEN {
            return Err(BackupError::Format(format!(
                "Archive metadata is {} bytes, limit is {}",
                json.len(),
                MAX_METADATA_LEN
            )));
        }

        writer.write_all(&(json.len() as u32).to_be_bytes())?;
        writer.write_all(&json)?;

        Ok(Self {
            encoder: GzEncoder::new(writer, level),
            expected: metadata.tables.clone(),
            written: 0,
            current: None,
        })
    }

    /// Start the next table; tables must follow the metadata order
    pub fn begin_table(&mut self, table: &str) -> BackupResult<()> {
        if let Some((open, _)) = &self.current {
            return Err(BackupError::Format(format!(
                "Cannot begin table '{}' while '{}' is open",
                table, open
            )));
        }

        match self.expected.get(self.written) {
            Some(next) if next == table => {}
            _ => {
                return Err(BackupError::Format(format!(
                    "Table '{}' is not the next table listed in archive metadata",
                    table
                )))
            }
        }

        self.write_line(&Marker::Begin {
            table: table.to_string(),
        })?;
        self.current = Some((table.to_string(), 0));
        Ok(())
    }

    pub fn write_row(&mut self, row: &[Value]) -> BackupResult<()> {
        if self.current.is_none() {
            return Err(BackupError::Format("Row written outside a table".into()));
        }
        self.write_line(&row)?;
        if let Some((_, rows)) = self.current.as_mut() {
            *rows += 1;
        }
        Ok(())
    }

    /// Close the open table, returning its row count
    pub fn end_table(&mut self) -> BackupResult<u64> {
        let (table, rows) = self
            .current
            .take()
            .ok_or_else(|| BackupError::Format("No table is open".into()))?;

        self.write_line(&Marker::End { table, rows })?;
        self.written += 1;
        Ok(rows)
    }

    /// Close the data block and return the underlying writer
    pub fn finish(mut self) -> BackupResult<W> {
        if let Some((open, _)) = &self.current {
            return Err(BackupError::Format(format!("Table '{}' was never ended", open)));
        }
        if self.written != self.expected.len() {
            return Err(BackupError::Format(format!(
                "Archive metadata lists {} tables but {} were written",
                self.expected.len(),
                self.written
            )));
        }

        self.write_line(&Marker::Finish {
            tables: self.written,
        })?;
        Ok(self.encoder.finish()?)
    }

    fn write_line<T: Serialize + ?Sized>(&mut self, value: &T) -> BackupResult<()> {
        serde_json::to_writer(&mut self.encoder, value)?;
        self.encoder.write_all(b"\n")?;
        Ok(())
    }
}

/// Streaming archive reader
pub struct ArchiveReader<R: Read> {
    metadata: ArchiveMetadata,
    lines: BufReader<GzDecoder<R>>,
    buf: String,
    line_no: u64,
    seen: HashSet<String>,
    current: Option<(String, u64)>,
    finished: bool,
}

impl<R: Read> ArchiveReader<R> {
    /// Read and validate the metadata block; table data is read on demand
    pub fn new(mut reader: R) -> BackupResult<Self> {
        let metadata = read_metadata_from(&mut reader)?;
        Ok(Self {
            metadata,
            lines: BufReader::new(GzDecoder::new(reader)),
            buf: String::new(),
            line_no: 0,
            seen: HashSet::new(),
            current: None,
            finished: false,
        })
    }

    pub fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    /// Advance to the next table, skipping unread rows of the current one
    ///
    /// Returns `None` after the last table.
    pub fn next_table(&mut self) -> BackupResult<Option<String>> {
        while self.current.is_some() {
            self.next_row()?;
        }
        if self.finished {
            return Ok(None);
        }

        match self.read_line()? {
            Line::Marker(Marker::Begin { table }) => {
                if !self.metadata.tables.contains(&table) {
                    return Err(BackupError::Format(format!(
                        "Table '{}' is not listed in archive metadata",
                        table
                    )));
                }
                if !self.seen.insert(table.clone()) {
                    return Err(BackupError::Format(format!(
                        "Table '{}' appears twice in archive data",
                        table
                    )));
                }
                self.current = Some((table.clone(), 0));
                Ok(Some(table))
            }
            Line::Marker(Marker::Finish { tables }) => {
                if tables != self.seen.len() || tables != self.metadata.table_count {
                    return Err(BackupError::Format(format!(
                        "Archive data holds {} tables, metadata declares {}",
                        self.seen.len(),
                        self.metadata.table_count
                    )));
                }
                self.finished = true;
                Ok(None)
            }
            _ => Err(self.unexpected("a table marker")),
        }
    }

    /// Next row of the current table, `None` once the table has ended
    pub fn next_row(&mut self) -> BackupResult<Option<Row>> {
        if self.current.is_none() {
            return Ok(None);
        }

        match self.read_line()? {
            Line::Row(row) => {
                if let Some((_, count)) = self.current.as_mut() {
                    *count += 1;
                }
                Ok(Some(row))
            }
            Line::Marker(Marker::End { table, rows }) => {
                let (open, count) = self.current.take().unwrap_or_default();
                if table != open || rows != count {
                    return Err(BackupError::Format(format!(
                        "Table '{}' has {} rows but its end marker declares '{}' with {}",
                        open, count, table, rows
                    )));
                }
                Ok(None)
            }
            _ => Err(self.unexpected("a row")),
        }
    }

    /// Up to `max` rows of the current table; empty once the table has ended
    pub fn read_rows(&mut self, max: usize) -> BackupResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(max.min(1024));
        while rows.len() < max {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    fn read_line(&mut self) -> BackupResult<Line> {
        self.buf.clear();
        let read = self
            .lines
            .read_line(&mut self.buf)
            .map_err(|e| BackupError::Format(format!("Corrupt table data: {}", e)))?;
        if read == 0 {
            return Err(BackupError::Format("Archive table data is truncated".into()));
        }
        self.line_no += 1;

        let line = self.buf.trim_end();
        let parsed = if line.starts_with('[') {
            serde_json::from_str(line).map(Line::Row)
        } else {
            serde_json::from_str(line).map(Line::Marker)
        };
        parsed.map_err(|e| {
            BackupError::Format(format!("Invalid table data at line {}: {}", self.line_no, e))
        })
    }

    fn unexpected(&self, wanted: &str) -> BackupError {
        BackupError::Format(format!(
            "Expected {} at line {} of table data",
            wanted, self.line_no
        ))
    }
}

/// Read only the metadata block of a plain archive
///
/// Cost is bounded by the metadata size; the table data is never
/// decompressed.
pub fn read_metadata(bytes: &[u8]) -> BackupResult<ArchiveMetadata> {
    let mut reader = bytes;
    read_metadata_from(&mut reader)
}

fn read_metadata_from<R: Read>(reader: &mut R) -> BackupResult<ArchiveMetadata> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    reader
        .read_exact(&mut prefix)
        .map_err(|_| BackupError::Format("Archive is too short to hold metadata".into()))?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 || len > MAX_METADATA_LEN {
        return Err(BackupError::Format(format!(
            "Archive metadata length {} is out of range",
            len
        )));
    }

    let mut json = vec![0u8; len];
    reader
        .read_exact(&mut json)
        .map_err(|_| BackupError::Format("Archive metadata is truncated".into()))?;

    let metadata: ArchiveMetadata = serde_json::from_slice(&json)
        .map_err(|e| BackupError::Format(format!("Invalid archive metadata: {}", e)))?;
    metadata.validate()?;
    Ok(metadata)
}

/// Encode a complete archive from in-memory snapshots
pub fn serialize(metadata: &ArchiveMetadata, snapshots: &[TableSnapshot]) -> BackupResult<Vec<u8>> {
    let mut writer = ArchiveWriter::new(Vec::new(), metadata)?;
    for snapshot in snapshots {
        writer.begin_table(&snapshot.name)?;
        for row in &snapshot.rows {
            writer.write_row(row)?;
        }
        writer.end_table()?;
    }
    writer.finish()
}

/// Decode a complete archive into memory
pub fn deserialize(bytes: &[u8]) -> BackupResult<(ArchiveMetadata, Vec<TableSnapshot>)> {
    let mut reader = ArchiveReader::new(bytes)?;
    let mut snapshots = Vec::with_capacity(reader.metadata().table_count);

    while let Some(table) = reader.next_table()? {
        let mut snapshot = TableSnapshot::new(table);
        while let Some(row) = reader.next_row()? {
            snapshot.rows.push(row);
        }
        snapshots.push(snapshot);
    }

    Ok((reader.metadata, snapshots))
}
