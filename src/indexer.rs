//! Incremental indexing: folds source change history into the table stores.
//!
//! Each source carries a watermark ([`IndexMeta`]) recording the last source
//! version fully applied. A sync pass runs under the source's `index:` lock,
//! slices history over `(watermark, current]`, collapses it last-write-wins
//! per path, applies each surviving change to every table whose pattern
//! matches, and advances the watermark. A file that fails to parse or
//! validate is reported and skipped; its version is still covered by the
//! advanced watermark, so a bad file stays unindexed until its next change.
//!
//! Structural table changes are caught by [`reset_outdated_tables`], which
//! compares each definition checksum against the one stored at the last run
//! and clears rebuilt tables plus every watermark, forcing a full re-pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::db::DbCore;
use crate::error::Result;
use crate::events::Event;
use crate::record::{IndexMeta, Record};
use crate::source::{ChangeType, FileActivity, Source};
use crate::storage::ScanBounds;
use crate::table::TableCore;

pub(crate) const META_KEYSPACE: &str = "_index_meta";
pub(crate) const CHECKSUM_KEYSPACE: &str = "_checksums";

pub(crate) async fn read_meta(db: &DbCore, url: &str) -> Result<IndexMeta> {
    match db.backend.get(META_KEYSPACE, url).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(IndexMeta {
            url: url.to_string(),
            version: 0,
        }),
    }
}

async fn write_meta(db: &DbCore, meta: &IndexMeta) -> Result<()> {
    db.backend
        .put(META_KEYSPACE, &meta.url, &serde_json::to_string(meta)?)
        .await
}

/// Bring the local store up to date with `source`.
///
/// Serialized per source by the `index:` lock; concurrent callers queue and
/// the later ones find nothing left to do. Emits `SourceIndexing`, one
/// `SourceIndexProgress` per applied change, `IndexUpdated` per touched
/// table, and `SourceIndexed` on convergence.
pub(crate) async fn sync_source(db: &Arc<DbCore>, source: &Arc<dyn Source>) -> Result<()> {
    let url = source.url().to_string();
    let _guard = db.locks.acquire(&format!("index:{url}")).await;
    db.ensure_open()?;

    let mut meta = read_meta(db, &url).await?;
    let target = source.info().await?.version;
    if meta.version >= target {
        db.emit(Event::SourceIndexed {
            url,
            version: meta.version,
        });
        return Ok(());
    }

    db.emit(Event::SourceIndexing {
        url: url.clone(),
        start_version: meta.version,
        target_version: target,
    });

    // keep only changes some table cares about, folded last-write-wins
    // per path
    let history = source.history(meta.version + 1, target + 1).await?;
    let mut latest: HashMap<String, crate::source::HistoryEntry> = HashMap::new();
    for entry in history {
        if !db.tables.iter().any(|table| table.is_record_file(&entry.path)) {
            continue;
        }
        match latest.get(&entry.path) {
            Some(kept) if kept.version > entry.version => {}
            _ => {
                latest.insert(entry.path.clone(), entry);
            }
        }
    }
    let mut changes: Vec<_> = latest.into_values().collect();
    changes.sort_by_key(|entry| entry.version);

    let total = changes.len();
    let mut touched: HashSet<String> = HashSet::new();
    for (tick, entry) in changes.into_iter().enumerate() {
        // overlapping patterns resolve to the first table in definition
        // order
        if let Some(table) = db
            .tables
            .iter()
            .find(|table| table.is_record_file(&entry.path))
        {
            let record_url = format!("{}{}", url, entry.path);
            let applied = match entry.change {
                // a Del for a path never indexed changes nothing
                ChangeType::Del => table.store.delete(&record_url).await,
                ChangeType::Put => index_file(db, source, table, &entry.path, &record_url)
                    .await
                    .map(|()| true),
            };
            match applied {
                Ok(true) => {
                    touched.insert(table.name.clone());
                }
                Ok(false) => {}
                Err(err) => {
                    warn!("{record_url}: skipped: {err}");
                    db.emit(Event::ValidationFailed {
                        url: record_url,
                        error: err.to_string(),
                    });
                }
            }
        }
        db.emit(Event::SourceIndexProgress {
            url: url.clone(),
            tick: tick + 1,
            total,
        });
    }

    meta.version = target;
    write_meta(db, &meta).await?;
    for table in touched {
        db.emit(Event::IndexUpdated {
            table,
            source: url.clone(),
            version: target,
        });
    }
    db.emit(Event::SourceIndexed {
        url,
        version: target,
    });
    Ok(())
}

async fn index_file(
    db: &DbCore,
    source: &Arc<dyn Source>,
    table: &Arc<TableCore>,
    path: &str,
    record_url: &str,
) -> Result<()> {
    source.download(path).await?;
    let bytes = source.read_file(path).await?;
    let body = serde_json::from_slice(&bytes)?;
    let body = table.prepare(body)?;
    let record = Record {
        url: record_url.to_string(),
        origin: source.url().to_string(),
        indexed_at: Utc::now().timestamp_millis(),
        record: body,
    };
    table.store.put(record_url, &record).await?;
    db.emit(Event::PutRecord {
        table: table.name.clone(),
        record,
    });
    Ok(())
}

/// Remove every record a source contributed, across all tables, plus its
/// watermark. Uses each table's implicit `:origin` index to find them.
pub(crate) async fn unindex_source(db: &DbCore, url: &str) -> Result<()> {
    let _guard = db.locks.acquire(&format!("index:{url}")).await;
    for table in &db.tables {
        let refs = table
            .store
            .scan_index_refs(":origin", &ScanBounds::only(url), crate::storage::Direction::Forward)
            .await?;
        for (_, record_url) in refs {
            table.store.delete(&record_url).await?;
        }
    }
    db.backend.delete(META_KEYSPACE, url).await?;
    debug!("{url}: unindexed");
    Ok(())
}

/// Compare each table's definition checksum against the stored one and
/// clear tables whose definition changed, resetting every source watermark
/// so the next sync re-reads them from scratch. Returns the names of the
/// tables rebuilt.
pub(crate) async fn reset_outdated_tables(db: &DbCore) -> Result<Vec<String>> {
    let mut rebuilt = Vec::new();
    for table in &db.tables {
        let checksum = table.def.checksum();
        let stored = db.backend.get(CHECKSUM_KEYSPACE, &table.name).await?;
        if stored.as_deref() != Some(checksum.as_str()) {
            if stored.is_some() {
                debug!("{}: definition changed, rebuilding", table.name);
            }
            table.store.clear().await?;
            db.backend
                .put(CHECKSUM_KEYSPACE, &table.name, &checksum)
                .await?;
            rebuilt.push(table.name.clone());
        }
    }
    if !rebuilt.is_empty() {
        let metas = db
            .backend
            .scan(META_KEYSPACE, &ScanBounds::all(), crate::storage::Direction::Forward)
            .await?;
        for (url, raw) in metas {
            let mut meta: IndexMeta = match serde_json::from_str(&raw) {
                Ok(meta) => meta,
                Err(_) => IndexMeta {
                    url: url.clone(),
                    version: 0,
                },
            };
            meta.version = 0;
            write_meta(db, &meta).await?;
        }
    }
    Ok(rebuilt)
}

/// Spawn a task that follows `source`'s file-activity stream and re-syncs
/// on every change to a path some table cares about. The task ends when the
/// source drops its stream or the database closes.
pub(crate) fn watch_source(db: Arc<DbCore>, source: Arc<dyn Source>) -> Result<JoinHandle<()>> {
    let patterns: Vec<String> = db
        .tables
        .iter()
        .map(|table| table.def.file_pattern.clone())
        .collect();
    let mut activity = source.activity(&patterns)?;
    Ok(tokio::spawn(async move {
        while let Some(event) = activity.recv().await {
            if !db.is_open() {
                break;
            }
            let outcome = match event {
                FileActivity::Invalidated { path } => source.download(&path).await,
                FileActivity::Changed { .. } => sync_source(&db, &source).await,
            };
            if let Err(err) = outcome {
                warn!("{}: watch: {err}", source.url());
            }
        }
    }))
}
