//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use rowsync_codec::Value;
use rowsync_protocol::{
    ChangeRecord, ColumnDescriptor, ColumnType, SyncSchema, TableDescriptor, TableName,
};
use rowsync_storage::MemoryStore;

/// Name of the benchmark table.
pub fn documents() -> TableName {
    TableName::new("Documents")
}

/// A one-table schema: `Documents(id PK, title, body, size)`.
pub fn bench_schema() -> SyncSchema {
    SyncSchema::new(vec![TableDescriptor::new(documents())
        .with_column(ColumnDescriptor::new("id", ColumnType::Integer).not_null())
        .with_column(ColumnDescriptor::new("title", ColumnType::Text))
        .with_column(ColumnDescriptor::new("body", ColumnType::Text))
        .with_column(ColumnDescriptor::new("size", ColumnType::Integer))
        .with_primary_key(&["id"])])
    .expect("bench schema is valid")
}

/// Generate random text of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a document row with a body of `body_len` characters.
pub fn document(id: i64, body_len: usize) -> Vec<Value> {
    vec![
        Value::Integer(id),
        Value::Text(random_text(16)),
        Value::Text(random_text(body_len)),
        Value::Integer(body_len as i64),
    ]
}

/// Generate `count` document changes.
pub fn document_changes(count: usize, body_len: usize) -> Vec<ChangeRecord> {
    (0..count as i64)
        .map(|id| ChangeRecord::upsert(documents(), document(id, body_len)))
        .collect()
}

/// A store holding `count` documents.
pub fn seeded_store(count: usize, body_len: usize) -> MemoryStore {
    let mut store = MemoryStore::new(bench_schema());
    for id in 0..count as i64 {
        store
            .insert_local(&documents(), document(id, body_len))
            .expect("Failed to insert document");
    }
    store
}
