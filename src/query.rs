//! Query surface: lazy description of an ordered, bounded, filtered walk
//! over one table.
//!
//! A [`Query`] is cheap to build and clone; nothing touches storage until a
//! terminal operation (`each`, `to_array`, `first`, `count`, `update`,
//! `delete`, ...) runs. Candidate order comes from the chosen index (record
//! url order when none is chosen), and the pipeline applies, in order:
//! distinct dedup by url, offset (counted over raw candidate positions,
//! before filters), filters, emit, limit, then the `until` stop test. The
//! record that satisfies `until` is itself emitted when it passes the
//! filters.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::db::DbCore;
use crate::error::{Error, Result};
use crate::indexer;
use crate::keys::scalar_key;
use crate::record::Record;
use crate::storage::Direction;
use crate::table::TableCore;
use crate::where_clause::{WhereBuilder, WhereClause};

pub(crate) type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Query {
    pub(crate) db: Arc<DbCore>,
    pub(crate) table: Arc<TableCore>,
    pub(crate) where_clause: Option<WhereClause>,
    order: Option<String>,
    filters: Vec<Predicate>,
    until: Option<Predicate>,
    reverse: bool,
    offset: usize,
    limit: Option<usize>,
    distinct: bool,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").finish_non_exhaustive()
    }
}

impl Query {
    pub(crate) fn new(db: Arc<DbCore>, table: Arc<TableCore>) -> Self {
        Self {
            db,
            table,
            where_clause: None,
            order: None,
            filters: Vec::new(),
            until: None,
            reverse: false,
            offset: 0,
            limit: None,
            distinct: false,
        }
    }

    pub(crate) fn push_filter(&mut self, filter: Predicate) {
        self.filters.push(filter);
    }

    /// Walk candidates in `index` order. Mutually exclusive with a where
    /// clause on another index; the conflict surfaces when the query runs.
    pub fn order_by(mut self, index: impl Into<String>) -> Self {
        self.order = Some(index.into());
        self
    }

    /// Start a where clause on `index`; the builder's relation finishes it.
    pub fn where_by(self, index: impl Into<String>) -> WhereBuilder {
        WhereBuilder::new(self, index)
    }

    /// Client-side predicate; a record must pass every filter to be emitted.
    pub fn filter(mut self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(predicate));
        self
    }

    /// Stop the walk at the first candidate satisfying `predicate`
    /// (inclusive: that candidate is still emitted if it passes the
    /// filters).
    pub fn until(mut self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.until = Some(Arc::new(predicate));
        self
    }

    /// Skip the first `n` candidate positions. Offset counts raw scan
    /// positions, before filters run.
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Emit at most `n` records.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Toggle walk direction.
    pub fn reverse(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }

    /// Emit each url at most once. A multi-entry index can yield the same
    /// record under several keys; dedup happens before offset counting.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn direction(&self) -> Direction {
        if self.reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }

    fn chosen_index(&self) -> Result<Option<&str>> {
        match (&self.where_clause, &self.order) {
            (Some(clause), Some(order)) if *order != clause.index => Err(Error::query(format!(
                "cannot order by {:?} while where-bound on {:?}",
                order, clause.index
            ))),
            (Some(clause), _) => Ok(Some(clause.index.as_str())),
            (None, Some(order)) => Ok(Some(order.as_str())),
            (None, None) => Ok(None),
        }
    }

    /// Resolve candidates in walk order. Index walks resolve each url back
    /// to its primary record, skipping urls whose record has gone missing.
    async fn candidates(&self) -> Result<Vec<Record>> {
        let bounds = self
            .where_clause
            .as_ref()
            .map(WhereClause::bounds)
            .unwrap_or_default();
        let store = &self.table.store;
        match self.chosen_index()? {
            None | Some(":url") => Ok(store
                .scan(&bounds, self.direction())
                .await?
                .into_iter()
                .map(|(_, record)| record)
                .collect()),
            Some(index) => Ok(store
                .scan_index(index, &bounds, self.direction())
                .await?
                .into_iter()
                .map(|(_, record)| record)
                .collect()),
        }
    }

    /// Run the walk, calling `visit` once per emitted record.
    pub async fn each(&self, mut visit: impl FnMut(&Record)) -> Result<()> {
        self.db.ensure_open()?;
        let candidates = self.candidates().await?;
        let mut seen = HashSet::new();
        let mut position = 0usize;
        let mut emitted = 0usize;
        for record in &candidates {
            if self.distinct && !seen.insert(record.url.clone()) {
                continue;
            }
            if position >= self.offset && self.filters.iter().all(|filter| filter(record)) {
                visit(record);
                emitted += 1;
                if self.limit.is_some_and(|limit| emitted >= limit) {
                    break;
                }
            }
            position += 1;
            if let Some(until) = &self.until {
                if until(record) {
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn to_array(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        self.each(|record| out.push(record.clone())).await?;
        Ok(out)
    }

    pub async fn count(&self) -> Result<usize> {
        let mut n = 0;
        self.each(|_| n += 1).await?;
        Ok(n)
    }

    pub async fn first(&self) -> Result<Option<Record>> {
        let mut out = None;
        self.clone()
            .limit(1)
            .each(|record| out = Some(record.clone()))
            .await?;
        Ok(out)
    }

    pub async fn last(&self) -> Result<Option<Record>> {
        self.clone().reverse().first().await
    }

    /// Run the walk, calling `visit` with each record's key (the table's
    /// primary-key field when declared, the url otherwise).
    pub async fn each_key(&self, mut visit: impl FnMut(&str)) -> Result<()> {
        let primary_key = self.table.def.primary_key.clone();
        self.each(|record| {
            let key = primary_key
                .as_deref()
                .and_then(|field| record.field(field))
                .and_then(|value| scalar_key(&value))
                .unwrap_or_else(|| record.url.clone());
            visit(&key);
        })
        .await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.each_key(|key| out.push(key.to_string())).await?;
        Ok(out)
    }

    /// Keys with duplicates removed, first occurrence order preserved.
    pub async fn unique_keys(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.each_key(|key| {
            if seen.insert(key.to_string()) {
                out.push(key.to_string());
            }
        })
        .await?;
        Ok(out)
    }

    pub async fn each_url(&self, mut visit: impl FnMut(&str)) -> Result<()> {
        self.each(|record| visit(&record.url)).await
    }

    pub async fn urls(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.each_url(|url| out.push(url.to_string())).await?;
        Ok(out)
    }

    /// Merge the fields of `changes` into each matched record's body and
    /// write the result back to its source file. Records whose source is
    /// unknown or not writable are skipped silently. Returns the number of
    /// records written.
    pub async fn update(&self, changes: Value) -> Result<usize> {
        let Value::Object(changes) = changes else {
            return Err(Error::parameter("update() requires an object of changes"));
        };
        self.update_with(move |record| {
            let mut body = record.record.clone();
            if let Value::Object(fields) = &mut body {
                for (name, value) in &changes {
                    fields.insert(name.clone(), value.clone());
                }
            }
            Some(body)
        })
        .await
    }

    /// Write-back with a caller-supplied rewrite: `rewrite` returns the new
    /// body, or `None` to leave the record untouched.
    pub async fn update_with(
        &self,
        mut rewrite: impl FnMut(&Record) -> Option<Value>,
    ) -> Result<usize> {
        let mut written = 0;
        for record in self.to_array().await? {
            let Some(source) = self.db.writable_source(&record.origin) else {
                continue;
            };
            let Some(body) = rewrite(&record) else {
                continue;
            };
            let body = self.table.prepare(body)?;
            let bytes = self.table.encode(&body)?;
            source.write_file(record.path(), &bytes).await?;
            indexer::sync_source(&self.db, &source).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Unlink each matched record's source file. Records whose source is
    /// unknown or not writable are skipped silently. Returns the number of
    /// files removed.
    pub async fn delete(&self) -> Result<usize> {
        let mut removed = 0;
        for record in self.to_array().await? {
            let Some(source) = self.db.writable_source(&record.origin) else {
                continue;
            };
            source.unlink(record.path()).await?;
            indexer::sync_source(&self.db, &source).await?;
            removed += 1;
        }
        Ok(removed)
    }
}
