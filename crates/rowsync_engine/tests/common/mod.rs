//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use rowsync_engine::{BatchDirectory, CborRowCodec, RowCodec, SyncResult};
use rowsync_protocol::{BatchInfo, BatchPartInfo, ChangeRecord, SyncSchema, TableName, Timestamp};
use std::path::Path;

/// Writes `rows` as a batch over `schema`, one part per table, tables in
/// dependency order.
pub fn write_batch(
    root: &Path,
    schema: &SyncSchema,
    rows: &[ChangeRecord],
) -> (BatchDirectory, BatchInfo) {
    write_batch_split(root, schema, rows, usize::MAX)
}

/// Like [`write_batch`], but starts a new part every `rows_per_part` rows.
pub fn write_batch_split(
    root: &Path,
    schema: &SyncSchema,
    rows: &[ChangeRecord],
    rows_per_part: usize,
) -> (BatchDirectory, BatchInfo) {
    let directory = BatchDirectory::create_unique(root).unwrap();
    let sanitized = schema.sanitized();
    let mut batch = BatchInfo::new(directory.batch_id(), schema, Timestamp::new(1));
    let codec = CborRowCodec::new();

    for table in sanitized.parents_first() {
        let table_rows: Vec<_> = rows.iter().filter(|r| r.table == table.name).collect();
        let chunks: Vec<_> = table_rows.chunks(rows_per_part).collect();
        for (n, chunk) in chunks.iter().enumerate() {
            let index = batch.next_index();
            let mut writer = codec
                .create_writer(&directory.part_path_for(index, &table.name), table)
                .unwrap();
            for row in chunk.iter() {
                writer.write_row(row).unwrap();
            }
            let count = writer.finish().unwrap();
            batch
                .push_part(BatchPartInfo::new(
                    index,
                    table.name.clone(),
                    count,
                    n + 1 == chunks.len(),
                ))
                .unwrap();
        }
    }
    directory.write_summary(&batch).unwrap();
    (directory, batch)
}

/// Every row of every part of `table`, in part order.
pub fn read_table(
    directory: &BatchDirectory,
    batch: &BatchInfo,
    table: &TableName,
) -> Vec<ChangeRecord> {
    let layout = batch.schema.table(table).unwrap();
    let codec = CborRowCodec::new();
    batch
        .parts_for(table)
        .flat_map(|part| {
            codec
                .open_reader(&directory.part_path(part), layout)
                .unwrap()
                .collect::<SyncResult<Vec<_>>>()
                .unwrap()
        })
        .collect()
}
