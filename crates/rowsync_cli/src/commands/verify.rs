//! Verify command implementation.

use rowsync_engine::{BatchDirectory, CborRowCodec, RowCodec};
use rowsync_protocol::BatchInfo;
use std::path::Path;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of parts checked.
    pub parts_checked: usize,
    /// Number of rows read back.
    pub rows_read: u64,
    /// Number of parts that failed a check.
    pub corrupt_parts: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_parts == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying batch at {}", path.display());
    println!();

    let result = verify(path)?;
    println!("  Parts checked: {}", result.parts_checked);
    println!("  Rows read:     {}", result.rows_read);
    println!("  Corrupt parts: {}", result.corrupt_parts);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in result.errors.iter().take(10) {
            println!("    - {}", error);
        }
        if result.errors.len() > 10 {
            println!("    ... and {} more", result.errors.len() - 10);
        }
    }

    println!();
    if result.is_ok() {
        println!("✓ Batch verification passed");
        Ok(())
    } else {
        println!("✗ Batch verification failed");
        Err("Verification failed".into())
    }
}

/// Reads every part of the batch at `path` back and checks it against the
/// summary.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let directory = BatchDirectory::open(path)?;
    let batch = directory.load_summary()?;
    let mut result = VerifyResult::default();

    check_last_parts(&batch, &mut result);

    let codec = CborRowCodec::new();
    for part in batch.parts() {
        result.parts_checked += 1;
        let Some(layout) = batch.schema.table(&part.table) else {
            result.corrupt_parts += 1;
            result
                .errors
                .push(format!("part {}: table {} not in schema", part.index, part.table));
            continue;
        };

        let file = directory.part_path(part);
        let rows = codec
            .open_reader(&file, layout)
            .and_then(|reader| reader.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(rows) => {
                debug!(index = part.index, rows = rows.len(), "part read back");
                result.rows_read += rows.len() as u64;
                if rows.len() as u64 != part.row_count {
                    result.corrupt_parts += 1;
                    result.errors.push(format!(
                        "part {}: summary says {} rows, file holds {}",
                        part.index,
                        part.row_count,
                        rows.len()
                    ));
                }
            }
            Err(e) => {
                result.corrupt_parts += 1;
                result.errors.push(format!("part {}: {}", part.index, e));
            }
        }
    }

    Ok(result)
}

/// Every table with parts must end with exactly one last part.
fn check_last_parts(batch: &BatchInfo, result: &mut VerifyResult) {
    for table in batch.schema.tables() {
        let parts: Vec<_> = batch.parts_for(&table.name).collect();
        if let Some(last) = parts.last() {
            if !last.is_last_part {
                result
                    .errors
                    .push(format!("table {}: final part {} not marked last", table.name, last.index));
            }
        }
    }
}
