//! Table handles: the per-table read/write surface of a database.

use std::sync::Arc;

use globset::GlobMatcher;
use serde_json::Value;
use uuid::Uuid;

use crate::db::DbCore;
use crate::error::{Error, Result};
use crate::indexed::IndexedStore;
use crate::indexer;
use crate::keys::scalar_key;
use crate::query::Query;
use crate::record::Record;
use crate::schema::{compile_pattern, TableDefinition};
use crate::source::Source;
use crate::where_clause::WhereBuilder;

/// Shared per-table state: the normalized definition, its compiled file
/// matcher, and the indexed store backing it.
pub(crate) struct TableCore {
    pub name: String,
    pub def: TableDefinition,
    pub matcher: GlobMatcher,
    pub store: IndexedStore,
}

impl TableCore {
    pub(crate) fn new(
        def: TableDefinition,
        backend: Arc<dyn crate::storage::Backend>,
        locks: Arc<crate::lock::LockRegistry>,
    ) -> Result<Self> {
        let def = def.normalized()?;
        let matcher = compile_pattern(&def.file_pattern)?;
        let store = IndexedStore::new(backend, locks, &def.name, def.parsed_indexes()?);
        Ok(Self {
            name: def.name.clone(),
            def,
            matcher,
            store,
        })
    }

    pub(crate) fn is_record_file(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    /// Run the validate and preprocess hooks over a record body.
    pub(crate) fn prepare(&self, body: Value) -> Result<Value> {
        if let Some(validate) = &self.def.validate {
            validate(&body)?;
        }
        match &self.def.preprocess {
            Some(preprocess) => preprocess(body),
            None => Ok(body),
        }
    }

    /// Encode a record body for write-back. Pretty-printed JSON unless the
    /// table declares a serializer.
    pub(crate) fn encode(&self, body: &Value) -> Result<Vec<u8>> {
        match &self.def.serialize {
            Some(serialize) => serialize(body),
            None => Ok(serde_json::to_vec_pretty(body)?),
        }
    }
}

/// Public handle to one table of an open [`Database`](crate::Database).
#[derive(Clone)]
pub struct Table {
    pub(crate) db: Arc<DbCore>,
    pub(crate) core: Arc<TableCore>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// True when `path` matches this table's file pattern.
    pub fn is_record_file(&self, path: &str) -> bool {
        self.core.is_record_file(path)
    }

    /// Paths in `source` that match this table's file pattern.
    pub async fn list_record_files(&self, source: &dyn Source) -> Result<Vec<String>> {
        let names = source.readdir("/", true).await?;
        Ok(names
            .into_iter()
            .map(|name| format!("/{name}"))
            .filter(|path| self.core.is_record_file(path))
            .collect())
    }

    /// A fresh query over the whole table, in url order.
    pub fn query(&self) -> Query {
        Query::new(self.db.clone(), self.core.clone())
    }

    pub fn order_by(&self, index: impl Into<String>) -> Query {
        self.query().order_by(index)
    }

    pub fn where_by(&self, index: impl Into<String>) -> WhereBuilder {
        self.query().where_by(index)
    }

    /// Read the record at `url`. `Ok(None)` when no such record is indexed.
    pub async fn get(&self, url: &str) -> Result<Option<Record>> {
        self.db.ensure_open()?;
        match self.core.store.get(url).await {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// First record whose `index` key equals `key`.
    pub async fn get_by(&self, index: &str, key: impl Into<Value>) -> Result<Option<Record>> {
        self.db.ensure_open()?;
        let key = scalar_key(&key.into())
            .ok_or_else(|| Error::parameter("index keys must be strings, numbers, or booleans"))?;
        match self.core.store.get_by(index, &key).await {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write `body` as a new record file in the source identified by
    /// `origin` and index it. The filename comes from the table's file
    /// pattern, with `*` filled by the body's primary-key value when
    /// declared (a fresh uuid otherwise). Returns the new record's url.
    pub async fn add(&self, origin: &str, body: Value) -> Result<String> {
        self.db.ensure_open()?;
        let id = self
            .core
            .def
            .primary_key
            .as_deref()
            .and_then(|field| body.get(field))
            .and_then(scalar_key)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let path = if self.core.def.singular {
            self.core.def.file_pattern.clone()
        } else {
            self.core.def.file_pattern.replace('*', &id)
        };
        self.put_at(origin, &path, body).await
    }

    /// Write `body` at the exact record file `url` and index it. The url
    /// must lie inside a registered writable source and match this table's
    /// file pattern.
    pub async fn put(&self, url: &str, body: Value) -> Result<String> {
        self.db.ensure_open()?;
        let (origin, path) = self
            .db
            .split_url(url)
            .ok_or_else(|| Error::query(format!("{url} is not inside a registered source")))?;
        if !self.core.is_record_file(&path) {
            return Err(Error::query(format!(
                "{path} does not match table {:?} (pattern {:?})",
                self.core.name, self.core.def.file_pattern
            )));
        }
        self.put_at(&origin, &path, body).await
    }

    async fn put_at(&self, origin: &str, path: &str, body: Value) -> Result<String> {
        let source = self
            .db
            .writable_source(origin)
            .ok_or_else(|| Error::query(format!("{origin} is not a registered writable source")))?;
        let body = self.core.prepare(body)?;
        let bytes = self.core.encode(&body)?;
        source.write_file(path, &bytes).await?;
        indexer::sync_source(&self.db, &source).await?;
        Ok(format!("{}{}", source.url(), path))
    }

    /// Merge `changes` into the record at `url` and write it back. Returns
    /// the number of records written (0 when `url` is not indexed or its
    /// source is not writable).
    pub async fn update(&self, url: &str, changes: Value) -> Result<usize> {
        self.where_by(":url").equals(url)?.update(changes).await
    }

    /// Update the record at `url`, or create it with `body` when absent.
    pub async fn upsert(&self, url: &str, body: Value) -> Result<String> {
        let written = self.update(url, body.clone()).await?;
        if written > 0 {
            return Ok(url.to_string());
        }
        self.put(url, body).await
    }

    /// Unlink the record file at `url` and unindex it. Returns the number
    /// of files removed (0 when `url` is not indexed or its source is not
    /// writable).
    pub async fn delete(&self, url: &str) -> Result<usize> {
        self.where_by(":url").equals(url)?.delete().await
    }
}
