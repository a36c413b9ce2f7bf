//! Part file row codec.
//!
//! A part file holds the rows of one table, one frame per row:
//!
//! ```text
//! header:  magic "RSPT" (4) | version u16 LE (2)
//! frame:   state u8 (1) | length u32 LE (4) | payload | crc32 LE (4)
//! ```
//!
//! The payload is the canonical CBOR array of the row's values in the
//! column order of the batch's sanitized table. The CRC covers state,
//! length and payload.

use crate::error::{SyncError, SyncResult};
use rowsync_codec::{crc32, from_cbor, to_canonical_cbor, Value};
use rowsync_protocol::{ChangeRecord, RowState, TableDescriptor};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of a part file.
pub const PART_MAGIC: [u8; 4] = *b"RSPT";

/// Current part file version.
pub const PART_VERSION: u16 = 1;

const HEADER_SIZE: u64 = 6;
const FRAME_OVERHEAD: u64 = 1 + 4 + 4;
const MAX_FRAME_PAYLOAD: u32 = 256 * 1024 * 1024;

/// Streams rows of one table into a part file.
pub trait PartWriter {
    /// Appends one row.
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors, or if the row does not fit the table.
    fn write_row(&mut self, row: &ChangeRecord) -> SyncResult<()>;

    /// Bytes written so far, header included.
    fn size(&self) -> u64;

    /// Rows written so far.
    fn rows(&self) -> u64;

    /// Flushes and closes the file. Returns the row count.
    ///
    /// # Errors
    ///
    /// Fails if the flush fails.
    fn finish(self: Box<Self>) -> SyncResult<u64>;

    /// Closes and deletes the file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be removed.
    fn discard(self: Box<Self>) -> SyncResult<()>;
}

/// Lazy sequence of rows read back from a part file. Reopen the file to
/// read it again.
pub type PartReader = Box<dyn Iterator<Item = SyncResult<ChangeRecord>> + Send>;

/// Serializer used for part files.
pub trait RowCodec: Send + Sync {
    /// Creates (truncating) a part file for `table`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created.
    fn create_writer(&self, path: &Path, table: &TableDescriptor) -> SyncResult<Box<dyn PartWriter>>;

    /// Opens a part file for reading with `table` as the row layout.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or its header is invalid.
    fn open_reader(&self, path: &Path, table: &TableDescriptor) -> SyncResult<PartReader>;
}

/// The default framed CBOR codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborRowCodec;

impl CborRowCodec {
    /// Creates the codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RowCodec for CborRowCodec {
    fn create_writer(&self, path: &Path, table: &TableDescriptor) -> SyncResult<Box<dyn PartWriter>> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&PART_MAGIC)?;
        out.write_all(&PART_VERSION.to_le_bytes())?;
        Ok(Box::new(CborPartWriter {
            out,
            path: path.to_path_buf(),
            table: table.clone(),
            size: HEADER_SIZE,
            rows: 0,
        }))
    }

    fn open_reader(&self, path: &Path, table: &TableDescriptor) -> SyncResult<PartReader> {
        let mut input = BufReader::new(File::open(path)?);
        let mut header = [0u8; HEADER_SIZE as usize];
        input.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => SyncError::corrupt_part(path, "truncated header"),
            _ => SyncError::Io(e),
        })?;
        if header[0..4] != PART_MAGIC {
            return Err(SyncError::corrupt_part(path, "invalid magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > PART_VERSION {
            return Err(SyncError::corrupt_part(
                path,
                format!("unsupported version {version}"),
            ));
        }
        Ok(Box::new(CborPartReader {
            input,
            path: path.to_path_buf(),
            table: table.clone(),
            finished: false,
        }))
    }
}

struct CborPartWriter {
    out: BufWriter<File>,
    path: PathBuf,
    table: TableDescriptor,
    size: u64,
    rows: u64,
}

impl PartWriter for CborPartWriter {
    fn write_row(&mut self, row: &ChangeRecord) -> SyncResult<()> {
        if row.table != self.table.name {
            return Err(SyncError::schema_mismatch(
                &row.table,
                format!("row written to part of {}", self.table.name),
            ));
        }
        if row.values.len() != self.table.columns.len() {
            return Err(SyncError::schema_mismatch(
                &self.table.name,
                format!(
                    "row has {} values, table has {} columns",
                    row.values.len(),
                    self.table.columns.len()
                ),
            ));
        }

        let payload = to_canonical_cbor(&Value::Array(row.values.clone()))?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_PAYLOAD)
            .ok_or_else(|| {
                SyncError::schema_mismatch(&self.table.name, "row exceeds the frame size limit")
            })?;

        let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
        frame.push(row.state.to_code());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        self.out.write_all(&frame)?;
        self.size += frame.len() as u64;
        self.rows += 1;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn rows(&self) -> u64 {
        self.rows
    }

    fn finish(mut self: Box<Self>) -> SyncResult<u64> {
        self.out.flush()?;
        Ok(self.rows)
    }

    fn discard(self: Box<Self>) -> SyncResult<()> {
        let CborPartWriter { out, path, .. } = *self;
        drop(out);
        fs::remove_file(path)?;
        Ok(())
    }
}

struct CborPartReader {
    input: BufReader<File>,
    path: PathBuf,
    table: TableDescriptor,
    finished: bool,
}

impl CborPartReader {
    fn truncated(&self) -> SyncError {
        SyncError::corrupt_part(&self.path, "truncated frame")
    }

    fn read_exact_or_truncated(&mut self, buf: &mut [u8]) -> SyncResult<()> {
        self.input.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => self.truncated(),
            _ => SyncError::Io(e),
        })
    }

    fn read_next_row(&mut self) -> SyncResult<Option<ChangeRecord>> {
        let mut state = [0u8; 1];
        loop {
            match self.input.read(&mut state) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let state = RowState::from_code(state[0]).ok_or_else(|| {
            SyncError::corrupt_part(&self.path, format!("unknown row state {}", state[0]))
        })?;

        let mut len = [0u8; 4];
        self.read_exact_or_truncated(&mut len)?;
        let payload_len = u32::from_le_bytes(len);
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(SyncError::corrupt_part(
                &self.path,
                format!("frame length {payload_len} exceeds limit"),
            ));
        }

        // the length is unverified until the CRC matches, so grow with the input
        let mut payload = Vec::new();
        (&mut self.input)
            .take(u64::from(payload_len))
            .read_to_end(&mut payload)?;
        if payload.len() != payload_len as usize {
            return Err(self.truncated());
        }
        let mut stored = [0u8; 4];
        self.read_exact_or_truncated(&mut stored)?;

        let mut framed = Vec::with_capacity(payload.len() + 5);
        framed.push(state.to_code());
        framed.extend_from_slice(&len);
        framed.extend_from_slice(&payload);
        let expected = u32::from_le_bytes(stored);
        let actual = crc32(&framed);
        if expected != actual {
            return Err(SyncError::corrupt_part(
                &self.path,
                format!("checksum mismatch: expected {expected:08x}, got {actual:08x}"),
            ));
        }

        let values = match from_cbor(&payload)? {
            Value::Array(values) => values,
            other => {
                return Err(SyncError::corrupt_part(
                    &self.path,
                    format!("row payload is {}, expected array", other.type_name()),
                ))
            }
        };
        if values.len() != self.table.columns.len() {
            return Err(SyncError::schema_mismatch(
                &self.table.name,
                format!(
                    "part row has {} values, table has {} columns",
                    values.len(),
                    self.table.columns.len()
                ),
            ));
        }

        Ok(Some(ChangeRecord {
            table: self.table.name.clone(),
            state,
            values,
        }))
    }
}

impl Iterator for CborPartReader {
    type Item = SyncResult<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
