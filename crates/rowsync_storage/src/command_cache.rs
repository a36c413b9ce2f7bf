//! Per-store cache of prepared write commands.
//!
//! Stores resolve each table/command pair into some prepared form (a SQL
//! statement, a column mapping) once and reuse it for every row. The cache
//! is owned by the store instance, so two stores never share entries.

use parking_lot::RwLock;
use rowsync_protocol::TableName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of command a cache entry prepares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Changed-row selection.
    SelectChanges,
    /// Single-row lookup.
    SelectRow,
    /// Insert or update.
    Upsert,
    /// Delete.
    Delete,
    /// Tracking metadata update.
    UpdateMetadata,
}

/// Cache key: one command for one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    /// Table.
    pub table: TableName,
    /// Command.
    pub kind: CommandKind,
}

impl CommandKey {
    /// Creates a key.
    #[must_use]
    pub fn new(table: TableName, kind: CommandKind) -> Self {
        Self { table, kind }
    }
}

/// Cache of prepared commands keyed by table and command kind.
#[derive(Debug)]
pub struct CommandCache<V> {
    entries: RwLock<HashMap<CommandKey, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> Default for CommandCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<V: Clone> CommandCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached entry, if any.
    pub fn get(&self, key: &CommandKey) -> Option<V> {
        let found = self.entries.read().get(key).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Stores an entry, replacing any previous one.
    pub fn insert(&self, key: CommandKey, value: V) {
        self.entries.write().insert(key, value);
    }

    /// Returns the cached entry or builds and caches it.
    ///
    /// # Errors
    ///
    /// Returns the builder's error; nothing is cached in that case.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: CommandKey,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = build()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Drops every entry for one table.
    pub fn evict_table(&self, table: &TableName) {
        self.entries.write().retain(|key, _| &key.table != table);
    }

    /// Drops one entry.
    pub fn evict(&self, key: &CommandKey) -> Option<V> {
        self.entries.write().remove(key)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Lookups that found an entry.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
