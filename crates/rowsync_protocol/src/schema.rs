//! Table descriptors and the dependency-ordered sync schema.
//!
//! A [`SyncSchema`] is built once from a schema snapshot and stays
//! read-only for the whole session. Its table list is always ordered so
//! that a table referenced by a foreign key comes before the tables that
//! reference it; selection and the upsert phase walk it forward, the delete
//! phase walks it backward.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{SyncSide, TableName};
use crate::wire;
use rowsync_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    Text,
    /// Binary.
    Bytes,
    /// Boolean.
    Bool,
    /// Untyped; accepts any scalar.
    Any,
}

impl ColumnType {
    /// Returns true if `value` may be stored in a column of this type.
    /// NULL is accepted here; nullability is checked separately.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Any, Value::Array(_) | Value::Map(_)) => false,
            (ColumnType::Any, _) => true,
            (ColumnType::Integer, Value::Integer(_))
            | (ColumnType::Float, Value::Float(_) | Value::Integer(_))
            | (ColumnType::Text, Value::Text(_))
            | (ColumnType::Bytes, Value::Bytes(_))
            | (ColumnType::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }

    fn code(self) -> i64 {
        match self {
            ColumnType::Integer => 1,
            ColumnType::Float => 2,
            ColumnType::Text => 3,
            ColumnType::Bytes => 4,
            ColumnType::Bool => 5,
            ColumnType::Any => 6,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ColumnType::Integer),
            2 => Some(ColumnType::Float),
            3 => Some(ColumnType::Text),
            4 => Some(ColumnType::Bytes),
            5 => Some(ColumnType::Bool),
            6 => Some(ColumnType::Any),
            _ => None,
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Written by the engine only (row version, audit columns).
    pub read_only: bool,
    /// Derived from other columns.
    pub computed: bool,
}

impl ColumnDescriptor {
    /// Creates a nullable, writable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            read_only: false,
            computed: false,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Marks the column computed.
    #[must_use]
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Returns true if rows may carry a value for this column across a sync.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        !self.read_only && !self.computed
    }

    fn to_value(&self) -> Value {
        Value::map(vec![
            (wire::key("name"), Value::Text(self.name.clone())),
            (wire::key("type"), Value::Integer(self.column_type.code())),
            (wire::key("nullable"), Value::Bool(self.nullable)),
            (wire::key("read_only"), Value::Bool(self.read_only)),
            (wire::key("computed"), Value::Bool(self.computed)),
        ])
    }

    fn from_value(value: &Value) -> ProtocolResult<Self> {
        let code = wire::field(value, "type")?.as_integer().unwrap_or(0);
        let column_type = ColumnType::from_code(code)
            .ok_or_else(|| ProtocolError::invalid_summary(format!("unknown column type {code}")))?;
        Ok(Self {
            name: wire::text(value, "name")?,
            column_type,
            nullable: wire::boolean(value, "nullable")?,
            read_only: wire::boolean(value, "read_only")?,
            computed: wire::boolean(value, "computed")?,
        })
    }
}

/// A foreign key from this table to a parent table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Constraint name.
    pub name: String,
    /// Referencing columns in this table.
    pub columns: Vec<String>,
    /// Referenced table.
    pub parent: TableName,
    /// Referenced columns in the parent, same arity as `columns`.
    pub parent_columns: Vec<String>,
}

impl Relation {
    /// Creates a relation.
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        parent: TableName,
        parent_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            parent,
            parent_columns: parent_columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    fn to_value(&self) -> Value {
        Value::map(vec![
            (wire::key("name"), Value::Text(self.name.clone())),
            (wire::key("columns"), wire::text_list(&self.columns)),
            (wire::key("parent_schema"), Value::from(self.parent.schema.clone())),
            (wire::key("parent_name"), Value::Text(self.parent.name.clone())),
            (wire::key("parent_columns"), wire::text_list(&self.parent_columns)),
        ])
    }

    fn from_value(value: &Value) -> ProtocolResult<Self> {
        Ok(Self {
            name: wire::text(value, "name")?,
            columns: wire::strings(value, "columns")?,
            parent: TableName {
                schema: wire::opt_text(value, "parent_schema")?,
                name: wire::text(value, "parent_name")?,
            },
            parent_columns: wire::strings(value, "parent_columns")?,
        })
    }
}

/// Which side is allowed to send a table's changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Changes flow both ways.
    #[default]
    Bidirectional,
    /// Only client changes are sent to the server.
    UploadOnly,
    /// Only server changes are sent to the client.
    DownloadOnly,
    /// The table is provisioned but never synced.
    None,
}

impl SyncDirection {
    /// Returns true if `side` selects this table's changes.
    #[must_use]
    pub fn is_selected_by(self, side: SyncSide) -> bool {
        match side {
            SyncSide::Client => matches!(self, Self::Bidirectional | Self::UploadOnly),
            SyncSide::Server => matches!(self, Self::Bidirectional | Self::DownloadOnly),
        }
    }

    /// Returns true if `side` applies incoming changes for this table.
    #[must_use]
    pub fn is_applied_by(self, side: SyncSide) -> bool {
        match side {
            SyncSide::Client => matches!(self, Self::Bidirectional | Self::DownloadOnly),
            SyncSide::Server => matches!(self, Self::Bidirectional | Self::UploadOnly),
        }
    }

    fn code(self) -> i64 {
        match self {
            Self::Bidirectional => 1,
            Self::UploadOnly => 2,
            Self::DownloadOnly => 3,
            Self::None => 4,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Bidirectional),
            2 => Some(Self::UploadOnly),
            3 => Some(Self::DownloadOnly),
            4 => Some(Self::None),
            _ => None,
        }
    }
}

/// Description of one synced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Qualified name.
    pub name: TableName,
    /// Columns in storage order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary-key column names, in key order.
    pub primary_key: Vec<String>,
    /// Foreign keys to parent tables.
    pub relations: Vec<Relation>,
    /// Column sets with a uniqueness constraint besides the primary key.
    pub unique_keys: Vec<Vec<String>>,
    /// Sync direction.
    pub direction: SyncDirection,
}

impl TableDescriptor {
    /// Creates an empty, bidirectional table.
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            relations: Vec::new(),
            unique_keys: Vec::new(),
            direction: SyncDirection::Bidirectional,
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn with_unique_key(mut self, columns: &[&str]) -> Self {
        self.unique_keys
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// Sets the sync direction.
    #[must_use]
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Position of a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Positions of the primary-key columns, in key order.
    #[must_use]
    pub fn primary_key_indexes(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect()
    }

    /// Extracts the primary-key values from a full row.
    #[must_use]
    pub fn key_values(&self, values: &[Value]) -> Vec<Value> {
        self.primary_key_indexes()
            .into_iter()
            .map(|i| values.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Parent tables this table references, excluding self references.
    pub fn parents(&self) -> impl Iterator<Item = &TableName> {
        self.relations
            .iter()
            .map(|r| &r.parent)
            .filter(move |p| **p != self.name)
    }

    /// Returns true if this table has a foreign key to `parent`.
    #[must_use]
    pub fn depends_on(&self, parent: &TableName) -> bool {
        self.parents().any(|p| p == parent)
    }

    /// Copy without read-only and computed columns. Primary-key columns
    /// are always kept so rows stay addressable. Unique keys and relations
    /// that name a removed column are dropped with it.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut table = self.clone();
        table
            .columns
            .retain(|c| c.is_synced() || self.primary_key.contains(&c.name));
        let kept = |columns: &[String]| columns.iter().all(|c| table.column_index(c).is_some());
        let unique_keys = table
            .unique_keys
            .iter()
            .filter(|u| kept(u))
            .cloned()
            .collect();
        let relations = table
            .relations
            .iter()
            .filter(|r| kept(&r.columns))
            .cloned()
            .collect();
        table.unique_keys = unique_keys;
        table.relations = relations;
        table
    }

    /// Checks the descriptor is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidTable`] describing the first problem.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.columns.is_empty() {
            return Err(ProtocolError::invalid_table(&self.name, "no columns"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ProtocolError::invalid_table(
                    &self.name,
                    format!("duplicate column `{}`", column.name),
                ));
            }
        }
        if self.primary_key.is_empty() {
            return Err(ProtocolError::invalid_table(&self.name, "no primary key"));
        }
        self.check_columns_exist(&self.primary_key, "primary key")?;
        for relation in &self.relations {
            self.check_columns_exist(&relation.columns, &relation.name)?;
            if relation.columns.len() != relation.parent_columns.len() {
                return Err(ProtocolError::invalid_table(
                    &self.name,
                    format!("relation `{}` has mismatched column counts", relation.name),
                ));
            }
        }
        for unique in &self.unique_keys {
            self.check_columns_exist(unique, "unique key")?;
        }
        Ok(())
    }

    fn check_columns_exist(&self, columns: &[String], what: &str) -> ProtocolResult<()> {
        match columns.iter().find(|c| self.column_index(c).is_none()) {
            Some(missing) => Err(ProtocolError::invalid_table(
                &self.name,
                format!("{what} references unknown column `{missing}`"),
            )),
            None => Ok(()),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::map(vec![
            (wire::key("schema"), Value::from(self.name.schema.clone())),
            (wire::key("name"), Value::Text(self.name.name.clone())),
            (
                wire::key("columns"),
                Value::Array(self.columns.iter().map(ColumnDescriptor::to_value).collect()),
            ),
            (wire::key("primary_key"), wire::text_list(&self.primary_key)),
            (
                wire::key("relations"),
                Value::Array(self.relations.iter().map(Relation::to_value).collect()),
            ),
            (
                wire::key("unique_keys"),
                Value::Array(self.unique_keys.iter().map(|u| wire::text_list(u)).collect()),
            ),
            (wire::key("direction"), Value::Integer(self.direction.code())),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> ProtocolResult<Self> {
        let code = wire::field(value, "direction")?.as_integer().unwrap_or(0);
        let direction = SyncDirection::from_code(code)
            .ok_or_else(|| ProtocolError::invalid_summary(format!("unknown direction {code}")))?;
        let unique_keys = wire::array(value, "unique_keys")?
            .iter()
            .map(|u| {
                u.as_array()
                    .ok_or_else(|| ProtocolError::invalid_summary("unique key is not an array"))?
                    .iter()
                    .map(|c| {
                        c.as_text().map(str::to_string).ok_or_else(|| {
                            ProtocolError::invalid_summary("unique key column is not text")
                        })
                    })
                    .collect()
            })
            .collect::<ProtocolResult<Vec<Vec<String>>>>()?;

        Ok(Self {
            name: TableName {
                schema: wire::opt_text(value, "schema")?,
                name: wire::text(value, "name")?,
            },
            columns: wire::array(value, "columns")?
                .iter()
                .map(ColumnDescriptor::from_value)
                .collect::<ProtocolResult<_>>()?,
            primary_key: wire::strings(value, "primary_key")?,
            relations: wire::array(value, "relations")?
                .iter()
                .map(Relation::from_value)
                .collect::<ProtocolResult<_>>()?,
            unique_keys,
            direction,
        })
    }
}

/// The set of synced tables, ordered parents first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSchema {
    tables: Vec<TableDescriptor>,
}

impl SyncSchema {
    /// Validates the tables and orders them so that every table follows
    /// the tables it references. Among tables with no ordering constraint
    /// the input order is kept.
    ///
    /// # Errors
    ///
    /// Fails on invalid descriptors, duplicate names, relations to unknown
    /// tables or columns, and foreign-key cycles.
    pub fn new(tables: Vec<TableDescriptor>) -> ProtocolResult<Self> {
        let mut names = HashSet::new();
        for table in &tables {
            table.validate()?;
            if !names.insert(table.name.clone()) {
                return Err(ProtocolError::DuplicateTable(table.name.clone()));
            }
        }

        for table in &tables {
            for relation in &table.relations {
                let parent = tables
                    .iter()
                    .find(|t| t.name == relation.parent)
                    .ok_or_else(|| ProtocolError::UnknownTable(relation.parent.clone()))?;
                parent.check_columns_exist(&relation.parent_columns, &relation.name)?;
            }
        }

        let mut remaining = tables;
        let mut ordered: Vec<TableDescriptor> = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready = remaining.iter().position(|t| {
                t.parents()
                    .all(|parent| ordered.iter().any(|o| &o.name == parent))
            });
            match ready {
                Some(index) => ordered.push(remaining.remove(index)),
                None => {
                    return Err(ProtocolError::DependencyCycle {
                        tables: remaining.iter().map(|t| t.name.to_string()).collect(),
                    })
                }
            }
        }

        Ok(Self { tables: ordered })
    }

    /// A schema with no tables.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tables, parents first.
    #[must_use]
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if there are no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Looks up a table.
    #[must_use]
    pub fn table(&self, name: &TableName) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| &t.name == name)
    }

    /// Tables in upsert order (parents before children).
    pub fn parents_first(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.iter()
    }

    /// Tables in delete order (children before parents).
    pub fn children_first(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.iter().rev()
    }

    /// Copy with read-only and computed columns removed from every table.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut tables: Vec<TableDescriptor> =
            self.tables.iter().map(TableDescriptor::sanitized).collect();
        let columns: Vec<(TableName, HashSet<String>)> = tables
            .iter()
            .map(|t| (t.name.clone(), t.columns.iter().map(|c| c.name.clone()).collect()))
            .collect();
        for table in &mut tables {
            table.relations.retain(|relation| {
                columns
                    .iter()
                    .find(|(name, _)| *name == relation.parent)
                    .is_some_and(|(_, names)| {
                        relation.parent_columns.iter().all(|c| names.contains(c))
                    })
            });
        }
        // the order is already parents first and dropping relations keeps it valid
        Self { tables }
    }

    /// Encodes the schema as a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.tables.iter().map(TableDescriptor::to_value).collect())
    }

    /// Decodes a schema written by [`SyncSchema::to_value`].
    ///
    /// # Errors
    ///
    /// Fails if the value is malformed or the decoded tables are invalid.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        let tables = value
            .as_array()
            .ok_or_else(|| ProtocolError::invalid_summary("schema is not an array"))?
            .iter()
            .map(TableDescriptor::from_value)
            .collect::<ProtocolResult<Vec<_>>>()?;
        Self::new(tables)
    }
}
