//! Test fixtures and store helpers.
//!
//! The fixture schema is a two-table shop:
//!
//! ```text
//! Customers(id PK, name, email UNIQUE, updated_at read-only)
//! Orders(id PK, customer_id -> Customers.id, total)
//! ```

use rowsync_codec::Value;
use rowsync_protocol::{
    ChangeRecord, ColumnDescriptor, ColumnType, Relation, SyncSchema, TableDescriptor, TableName,
};
use rowsync_storage::MemoryStore;
use std::path::Path;
use tempfile::TempDir;

/// Name of the parent fixture table.
pub fn customers() -> TableName {
    TableName::new("Customers")
}

/// Name of the child fixture table.
pub fn orders() -> TableName {
    TableName::new("Orders")
}

/// Full descriptor of `Customers`.
pub fn customers_table() -> TableDescriptor {
    TableDescriptor::new(customers())
        .with_column(ColumnDescriptor::new("id", ColumnType::Integer).not_null())
        .with_column(ColumnDescriptor::new("name", ColumnType::Text))
        .with_column(ColumnDescriptor::new("email", ColumnType::Text))
        .with_column(ColumnDescriptor::new("updated_at", ColumnType::Integer).read_only())
        .with_primary_key(&["id"])
        .with_unique_key(&["email"])
}

/// Full descriptor of `Orders`.
pub fn orders_table() -> TableDescriptor {
    TableDescriptor::new(orders())
        .with_column(ColumnDescriptor::new("id", ColumnType::Integer).not_null())
        .with_column(ColumnDescriptor::new("customer_id", ColumnType::Integer))
        .with_column(ColumnDescriptor::new("total", ColumnType::Float))
        .with_primary_key(&["id"])
        .with_relation(Relation::new(
            "fk_orders_customers",
            &["customer_id"],
            customers(),
            &["id"],
        ))
}

/// The fixture schema, children listed first so ordering is exercised.
pub fn shop_schema() -> SyncSchema {
    SyncSchema::new(vec![orders_table(), customers_table()]).expect("fixture schema is valid")
}

/// A customer row in the full store layout.
pub fn customer(id: i64, name: &str) -> Vec<Value> {
    vec![
        Value::Integer(id),
        Value::from(name),
        Value::from(format!("{}@example.com", name.to_lowercase())),
        Value::Integer(0),
    ]
}

/// A customer change in the sanitized batch layout.
pub fn customer_change(id: i64, name: &str) -> ChangeRecord {
    let mut values = customer(id, name);
    values.truncate(3);
    ChangeRecord::upsert(customers(), values)
}

/// A customer tombstone in the sanitized batch layout.
pub fn customer_tombstone(id: i64) -> ChangeRecord {
    ChangeRecord::tombstone(
        &customers_table().sanitized(),
        &[Value::Integer(id), Value::Null, Value::Null],
    )
}

/// An order row, identical in store and batch layout.
pub fn order(id: i64, customer_id: i64, total: f64) -> Vec<Value> {
    vec![
        Value::Integer(id),
        Value::Integer(customer_id),
        Value::Float(total),
    ]
}

/// An order change.
pub fn order_change(id: i64, customer_id: i64, total: f64) -> ChangeRecord {
    ChangeRecord::upsert(orders(), order(id, customer_id, total))
}

/// An order tombstone.
pub fn order_tombstone(id: i64) -> ChangeRecord {
    ChangeRecord::tombstone(&orders_table(), &[Value::Integer(id), Value::Null, Value::Null])
}

/// A batch root directory removed on drop.
#[derive(Debug)]
pub struct TempBatchRoot {
    dir: TempDir,
}

impl TempBatchRoot {
    /// Creates a fresh directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TempBatchRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Store scenarios.
pub mod scenarios {
    use super::*;

    /// An empty store provisioned with the fixture schema.
    pub fn empty_store() -> MemoryStore {
        MemoryStore::new(shop_schema())
    }

    /// A store holding `customer_count` customers with `orders_each`
    /// orders apiece. Customer ids start at 1; order ids are
    /// `customer_id * 1000 + n`.
    pub fn seeded_store(customer_count: i64, orders_each: i64) -> MemoryStore {
        let mut store = empty_store();
        for id in 1..=customer_count {
            store
                .insert_local(&customers(), customer(id, &format!("Customer{id}")))
                .expect("Failed to insert customer");
            for n in 0..orders_each {
                store
                    .insert_local(&orders(), order(id * 1000 + n, id, 10.0 * n as f64))
                    .expect("Failed to insert order");
            }
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_orders_parents_first() {
        let schema = shop_schema();
        let order: Vec<_> = schema.parents_first().map(|t| t.name.name.clone()).collect();
        assert_eq!(order, vec!["Customers", "Orders"]);
    }

    #[test]
    fn seeded_store_counts() {
        let store = scenarios::seeded_store(3, 2);
        assert_eq!(store.row_count(&customers()).unwrap(), 3);
        assert_eq!(store.row_count(&orders()).unwrap(), 6);
    }

    #[test]
    fn batch_layout_drops_read_only_column() {
        let change = customer_change(1, "Ada");
        assert_eq!(change.values.len(), customers_table().sanitized().columns.len());
        assert_eq!(customer_tombstone(1).values[0], Value::Integer(1));
    }
}
