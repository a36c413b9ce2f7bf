//! Inspect command implementation.

use rowsync_engine::BatchDirectory;
use rowsync_protocol::{BatchInfo, SyncSchema};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Batch inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Batch id.
    pub batch_id: String,
    /// Store clock when the batch was selected.
    pub timestamp: u64,
    /// Number of part files.
    pub part_count: usize,
    /// Rows over all parts.
    pub total_rows: u64,
    /// Bytes over all part files found on disk.
    pub total_size: u64,
    /// Per-table statistics, parents first.
    pub tables: Vec<TableStats>,
    /// Schema carried by the batch (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SyncSchema>,
}

/// Statistics for one table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Qualified table name.
    pub table: String,
    /// Number of parts.
    pub parts: usize,
    /// Rows over the table's parts.
    pub rows: u64,
    /// Bytes over the table's part files.
    pub size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_schema: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_schema)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Loads the summary of the batch at `path` and measures its parts.
pub fn inspect(path: &Path, show_schema: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let directory = BatchDirectory::open(path)?;
    if !directory.summary_path().exists() {
        return Err(format!("No batch summary found at {}", path.display()).into());
    }
    let batch = directory.load_summary()?;

    let tables = table_stats(&directory, &batch);
    Ok(InspectResult {
        path: path.display().to_string(),
        batch_id: batch.batch_id.clone(),
        timestamp: batch.timestamp.as_u64(),
        part_count: batch.parts().len(),
        total_rows: batch.total_rows(),
        total_size: tables.iter().map(|t| t.size).sum(),
        tables,
        schema: show_schema.then(|| batch.schema.clone()),
    })
}

fn table_stats(directory: &BatchDirectory, batch: &BatchInfo) -> Vec<TableStats> {
    batch
        .schema
        .parents_first()
        .map(|table| {
            let parts: Vec<_> = batch.parts_for(&table.name).collect();
            let size = parts
                .iter()
                .filter_map(|part| fs::metadata(directory.part_path(part)).ok())
                .map(|meta| meta.len())
                .sum();
            TableStats {
                table: table.name.to_string(),
                parts: parts.len(),
                rows: parts.iter().map(|p| p.row_count).sum(),
                size,
            }
        })
        .collect()
}

fn print_text_output(result: &InspectResult) {
    println!("rowsync Batch Inspection");
    println!("========================");
    println!();
    println!("Path:      {}", result.path);
    println!("Batch:     {}", result.batch_id);
    println!("Timestamp: {}", result.timestamp);
    println!();
    println!("Parts:");
    println!("  Part files: {}", result.part_count);
    println!("  Rows:       {}", result.total_rows);
    println!("  Size:       {}", format_size(result.total_size));
    println!();
    println!("Tables:");
    for table in &result.tables {
        println!(
            "  {} - {} parts, {} rows, {}",
            table.table,
            table.parts,
            table.rows,
            format_size(table.size)
        );
    }

    if let Some(schema) = &result.schema {
        println!();
        println!("Schema:");
        for table in schema.parents_first() {
            println!("  {} ({:?})", table.name, table.direction);
            for column in &table.columns {
                let key = if table.primary_key.contains(&column.name) {
                    " [pk]"
                } else {
                    ""
                };
                println!("    {}: {:?}{}", column.name, column.column_type, key);
            }
            for relation in &table.relations {
                println!("    -> {} via {}", relation.parent, relation.name);
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::write_sample;
    use tempfile::tempdir;

    #[test]
    fn summarizes_parts_per_table() {
        let root = tempdir().unwrap();
        let directory = write_sample(root.path());

        let result = inspect(directory.path(), true).unwrap();
        assert_eq!(result.batch_id, "sample");
        assert_eq!(result.timestamp, 42);
        assert_eq!(result.part_count, 2);
        assert_eq!(result.total_rows, 4);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].parts, 2);
        assert!(result.total_size > 0);
        assert!(result.schema.is_some());
    }

    #[test]
    fn missing_summary_is_reported() {
        let root = tempdir().unwrap();
        assert!(inspect(root.path(), false).is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
