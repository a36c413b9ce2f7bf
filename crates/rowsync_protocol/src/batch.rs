//! Batch manifest.
//!
//! A change set is stored as a directory of part files, one table per part,
//! plus a summary that lists the parts so the manifest can be rebuilt
//! without scanning the directory. This module only models the manifest;
//! file I/O lives in the engine.

use crate::error::{ProtocolError, ProtocolResult};
use crate::schema::SyncSchema;
use crate::types::{TableName, Timestamp};
use crate::wire;
use rowsync_codec::{from_cbor, to_canonical_cbor, Value};
use serde::Serialize;

/// Extension of part files.
pub const PART_FILE_EXTENSION: &str = "rsp";

/// Name of the summary file inside a batch directory.
pub const SUMMARY_FILE_NAME: &str = "summary.cbor";

const SUMMARY_VERSION: u64 = 1;

/// Deterministic part file name for a table and global index.
#[must_use]
pub fn part_file_name(index: u32, table: &TableName) -> String {
    let table: String = table
        .to_string()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{index:04}_{table}.{PART_FILE_EXTENSION}")
}

/// One part file of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPartInfo {
    /// Global index, increasing across the whole batch.
    pub index: u32,
    /// Table whose rows the part holds.
    pub table: TableName,
    /// File name relative to the batch directory.
    pub file_name: String,
    /// Rows in the part; never zero.
    pub row_count: u64,
    /// True for the final part of the table's change set.
    pub is_last_part: bool,
}

impl BatchPartInfo {
    /// Creates a part entry with the deterministic file name.
    #[must_use]
    pub fn new(index: u32, table: TableName, row_count: u64, is_last_part: bool) -> Self {
        let file_name = part_file_name(index, &table);
        Self {
            index,
            table,
            file_name,
            row_count,
            is_last_part,
        }
    }

    fn to_value(&self) -> Value {
        Value::map(vec![
            (wire::key("index"), Value::from(self.index)),
            (wire::key("schema"), Value::from(self.table.schema.clone())),
            (wire::key("table"), Value::Text(self.table.name.clone())),
            (wire::key("file"), Value::Text(self.file_name.clone())),
            (wire::key("rows"), Value::Integer(to_i64(self.row_count))),
            (wire::key("last"), Value::Bool(self.is_last_part)),
        ])
    }

    fn from_value(value: &Value) -> ProtocolResult<Self> {
        let index = u32::try_from(wire::unsigned(value, "index")?)
            .map_err(|_| ProtocolError::invalid_summary("part index out of range"))?;
        Ok(Self {
            index,
            table: TableName {
                schema: wire::opt_text(value, "schema")?,
                name: wire::text(value, "table")?,
            },
            file_name: wire::text(value, "file")?,
            row_count: wire::unsigned(value, "rows")?,
            is_last_part: wire::boolean(value, "last")?,
        })
    }
}

/// Manifest of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchInfo {
    /// Batch id; also the directory name.
    pub batch_id: String,
    /// Store clock when selection ran.
    pub timestamp: Timestamp,
    /// Schema with read-only and computed columns removed; part rows are
    /// laid out in its column order.
    pub schema: SyncSchema,
    parts: Vec<BatchPartInfo>,
}

impl BatchInfo {
    /// Creates an empty manifest. The schema is sanitized here.
    pub fn new(batch_id: impl Into<String>, schema: &SyncSchema, timestamp: Timestamp) -> Self {
        Self {
            batch_id: batch_id.into(),
            timestamp,
            schema: schema.sanitized(),
            parts: Vec::new(),
        }
    }

    /// Index the next part should use.
    #[must_use]
    pub fn next_index(&self) -> u32 {
        self.parts.last().map_or(0, |p| p.index + 1)
    }

    /// Records a closed part.
    ///
    /// # Errors
    ///
    /// Rejects empty parts, non-increasing indexes, tables missing from the
    /// schema, and parts added after a table's last part.
    pub fn push_part(&mut self, part: BatchPartInfo) -> ProtocolResult<()> {
        if part.row_count == 0 {
            return Err(ProtocolError::InvalidPart(format!(
                "part {} of {} has no rows",
                part.index, part.table
            )));
        }
        if let Some(last) = self.parts.last() {
            if part.index <= last.index {
                return Err(ProtocolError::InvalidPart(format!(
                    "part index {} does not follow {}",
                    part.index, last.index
                )));
            }
        }
        if self.schema.table(&part.table).is_none() {
            return Err(ProtocolError::UnknownTable(part.table));
        }
        if self.parts_for(&part.table).any(|p| p.is_last_part) {
            return Err(ProtocolError::InvalidPart(format!(
                "table {} already has its last part",
                part.table
            )));
        }
        self.parts.push(part);
        Ok(())
    }

    /// All parts in index order.
    #[must_use]
    pub fn parts(&self) -> &[BatchPartInfo] {
        &self.parts
    }

    /// Parts of one table in index order.
    pub fn parts_for<'a>(
        &'a self,
        table: &'a TableName,
    ) -> impl Iterator<Item = &'a BatchPartInfo> + 'a {
        self.parts.iter().filter(move |p| &p.table == table)
    }

    /// Part with a given index.
    #[must_use]
    pub fn part(&self, index: u32) -> Option<&BatchPartInfo> {
        self.parts.iter().find(|p| p.index == index)
    }

    /// Rows recorded for one table.
    #[must_use]
    pub fn row_count_for(&self, table: &TableName) -> u64 {
        self.parts_for(table).map(|p| p.row_count).sum()
    }

    /// Rows recorded over all parts.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.parts.iter().map(|p| p.row_count).sum()
    }

    /// Returns true if no part was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encodes the summary artifact.
    ///
    /// # Errors
    ///
    /// Fails only if encoding fails.
    pub fn encode_summary(&self) -> ProtocolResult<Vec<u8>> {
        let value = Value::map(vec![
            (wire::key("version"), Value::Integer(to_i64(SUMMARY_VERSION))),
            (wire::key("batch_id"), Value::Text(self.batch_id.clone())),
            (
                wire::key("timestamp"),
                Value::Integer(to_i64(self.timestamp.as_u64())),
            ),
            (wire::key("row_count"), Value::Integer(to_i64(self.total_rows()))),
            (wire::key("schema"), self.schema.to_value()),
            (
                wire::key("parts"),
                Value::Array(self.parts.iter().map(BatchPartInfo::to_value).collect()),
            ),
        ]);
        Ok(to_canonical_cbor(&value)?)
    }

    /// Rebuilds a manifest from its summary artifact.
    ///
    /// # Errors
    ///
    /// Fails on malformed CBOR, an unknown version, invalid parts, or a
    /// row total that disagrees with the parts.
    pub fn decode_summary(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let version = wire::unsigned(&value, "version")?;
        if version != SUMMARY_VERSION {
            return Err(ProtocolError::invalid_summary(format!(
                "unsupported summary version {version}"
            )));
        }

        let mut batch = Self {
            batch_id: wire::text(&value, "batch_id")?,
            timestamp: Timestamp::new(wire::unsigned(&value, "timestamp")?),
            schema: SyncSchema::from_value(wire::field(&value, "schema")?)?,
            parts: Vec::new(),
        };
        for part in wire::array(&value, "parts")? {
            batch.push_part(BatchPartInfo::from_value(part)?)?;
        }

        let declared = wire::unsigned(&value, "row_count")?;
        if declared != batch.total_rows() {
            return Err(ProtocolError::invalid_summary(format!(
                "summary declares {declared} rows, parts hold {}",
                batch.total_rows()
            )));
        }
        Ok(batch)
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
