//! Secondary-index store: keeps derived indexes consistent with a primary
//! ordered keyspace.
//!
//! Each table owns one [`IndexedStore`]. Every index maps derived keys to an
//! ordered list of primary keys, for example a `lastName` index over people
//! records:
//!
//! ```text
//! Frazee => [mem://a/people/8.json, mem://b/people/5.json]
//! Vancil => [mem://c/people/2.json]
//! ```
//!
//! `put`/`delete` run under the per-record lock: the old value's derived
//! entries are removed from every index, the primary value is written, and
//! the new entries are added, all inside one critical section. A crash
//! between the primary write and the index writes can leave indexes stale
//! until the next full rebuild; there is no write-ahead log because the
//! primary store is itself a derived cache of the source repositories.

use std::sync::Arc;

use log::warn;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::keys::{join, scalar_key};
use crate::lock::LockRegistry;
use crate::record::Record;
use crate::schema::ParsedIndex;
use crate::storage::{Backend, Direction, ScanBounds};

/// One secondary index of a table: a parsed declaration plus its keyspace.
pub(crate) struct Index {
    pub name: String,
    multi_entry: bool,
    key_paths: Vec<Vec<String>>,
    pub keyspace: String,
}

impl Index {
    /// Derive the index keys a record contributes.
    ///
    /// Non-multi-entry: alternate key paths are tried in declaration order;
    /// the first path whose every field resolves to a defined scalar wins
    /// and produces a single `!`-joined key. Multi-entry: the single field
    /// is resolved, scalars coerce to a one-element array, and each scalar
    /// element produces one key. No resolution means the record simply
    /// contributes no entries.
    pub fn keys_for(&self, record: &Record) -> Vec<String> {
        if self.multi_entry {
            for path in &self.key_paths {
                let Some(value) = record.field(&path[0]) else {
                    continue;
                };
                return match value {
                    Value::Array(items) => {
                        items.iter().filter_map(|item| scalar_key(item)).collect()
                    }
                    other => scalar_key(&other).into_iter().collect(),
                };
            }
            Vec::new()
        } else {
            'paths: for path in &self.key_paths {
                let mut parts = Vec::with_capacity(path.len());
                for field in path {
                    let Some(value) = record.field(field) else {
                        continue 'paths;
                    };
                    let Some(part) = scalar_key(&value) else {
                        continue 'paths;
                    };
                    parts.push(part);
                }
                return vec![join(&parts)];
            }
            Vec::new()
        }
    }
}

/// A primary record keyspace plus its maintained secondary indexes.
pub struct IndexedStore {
    table: String,
    backend: Arc<dyn Backend>,
    locks: Arc<LockRegistry>,
    primary_keyspace: String,
    indexes: Vec<Index>,
}

impl IndexedStore {
    /// Stand-alone store for `def`, without a surrounding database. `def`
    /// is normalized first, so the implicit `:origin` index is present.
    pub fn open(
        backend: Arc<dyn Backend>,
        locks: Arc<LockRegistry>,
        def: crate::schema::TableDefinition,
    ) -> Result<Self> {
        let def = def.normalized()?;
        let parsed = def.parsed_indexes()?;
        Ok(Self::new(backend, locks, &def.name, parsed))
    }

    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        locks: Arc<LockRegistry>,
        table: &str,
        parsed: Vec<ParsedIndex>,
    ) -> Self {
        let indexes = parsed
            .into_iter()
            .map(|index| Index {
                keyspace: format!("{}/{}", table, index.name),
                name: index.name,
                multi_entry: index.multi_entry,
                key_paths: index.key_paths,
            })
            .collect();
        Self {
            table: table.to_string(),
            primary_keyspace: format!("{table}/_"),
            backend,
            locks,
            indexes,
        }
    }

    pub(crate) fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Read the record at `key`.
    pub async fn get(&self, key: &str) -> Result<Record> {
        match self.backend.get(&self.primary_keyspace, key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    /// Write `record` at `key`, rewriting affected index entries.
    pub async fn put(&self, key: &str, record: &Record) -> Result<()> {
        let _guard = self
            .locks
            .acquire(&format!("mutate:{}/{}", self.table, key))
            .await;
        if let Some(old) = self.read_existing(key).await {
            self.update_entries(key, &old, EntryOp::Remove).await?;
        }
        let raw = serde_json::to_string(record)?;
        self.backend.put(&self.primary_keyspace, key, &raw).await?;
        self.update_entries(key, record, EntryOp::Add).await
    }

    /// Delete the record at `key` and its derived index entries. Returns
    /// whether a record was present; deleting an absent key is a no-op.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self
            .locks
            .acquire(&format!("mutate:{}/{}", self.table, key))
            .await;
        if self.backend.get(&self.primary_keyspace, key).await?.is_none() {
            return Ok(false);
        }
        if let Some(old) = self.read_existing(key).await {
            self.update_entries(key, &old, EntryOp::Remove).await?;
        }
        self.backend.delete(&self.primary_keyspace, key).await?;
        Ok(true)
    }

    /// Ordered scan over the primary keyspace.
    pub async fn scan(
        &self,
        bounds: &ScanBounds,
        direction: Direction,
    ) -> Result<Vec<(String, Record)>> {
        let entries = self
            .backend
            .scan(&self.primary_keyspace, bounds, direction)
            .await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_str(&raw) {
                Ok(record) => out.push((key, record)),
                Err(err) => warn!("{}: undecodable record at {}: {}", self.table, key, err),
            }
        }
        Ok(out)
    }

    /// Ordered scan over one index, resolved to `(derived key, url)` pairs.
    ///
    /// Entries flatten in stored order: index key order outermost, url
    /// insertion order within an entry.
    pub(crate) async fn scan_index_refs(
        &self,
        index: &str,
        bounds: &ScanBounds,
        direction: Direction,
    ) -> Result<Vec<(String, String)>> {
        let index = self
            .index(index)
            .ok_or_else(|| Error::query(format!("invalid index: {index}")))?;
        let entries = self.backend.scan(&index.keyspace, bounds, direction).await?;
        let mut refs = Vec::new();
        for (key, raw) in entries {
            let urls: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            for url in urls {
                refs.push((key.clone(), url));
            }
        }
        Ok(refs)
    }

    /// Ordered scan over one index, resolving each entry's url list back to
    /// primary records. Urls whose primary record has gone missing are
    /// skipped (a stale index is tolerated until the next rebuild).
    pub async fn scan_index(
        &self,
        index: &str,
        bounds: &ScanBounds,
        direction: Direction,
    ) -> Result<Vec<(String, Record)>> {
        let refs = self.scan_index_refs(index, bounds, direction).await?;
        let mut out = Vec::with_capacity(refs.len());
        for (key, url) in refs {
            match self.get(&url).await {
                Ok(record) => out.push((key, record)),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// First record filed under `key` in `index`.
    pub async fn get_by(&self, index: &str, key: &str) -> Result<Record> {
        let records = self
            .scan_index(index, &ScanBounds::only(key), Direction::Forward)
            .await?;
        records
            .into_iter()
            .map(|(_, record)| record)
            .next()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Wipe the primary keyspace and every index keyspace.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear(&self.primary_keyspace).await?;
        for index in &self.indexes {
            self.backend.clear(&index.keyspace).await?;
        }
        Ok(())
    }

    async fn read_existing(&self, key: &str) -> Option<Record> {
        let raw = self.backend.get(&self.primary_keyspace, key).await.ok()??;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("{}: undecodable record at {}: {}", self.table, key, err);
                None
            }
        }
    }

    async fn update_entries(&self, key: &str, record: &Record, op: EntryOp) -> Result<()> {
        for index in &self.indexes {
            for index_key in index.keys_for(record) {
                let _guard = self
                    .locks
                    .acquire(&format!("entry:{}:{}", index.keyspace, index_key))
                    .await;
                let mut urls: Vec<String> = match self.backend.get(&index.keyspace, &index_key).await?
                {
                    Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
                    None => Vec::new(),
                };
                match op {
                    EntryOp::Add => {
                        if !urls.iter().any(|url| url == key) {
                            urls.push(key.to_string());
                        }
                    }
                    EntryOp::Remove => urls.retain(|url| url != key),
                }
                if urls.is_empty() {
                    self.backend.delete(&index.keyspace, &index_key).await?;
                } else {
                    self.backend
                        .put(&index.keyspace, &index_key, &serde_json::to_string(&urls)?)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum EntryOp {
    Add,
    Remove,
}
