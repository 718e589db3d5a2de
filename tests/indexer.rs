//! Incremental sync behavior: watermarks, history folding, validation
//! skips, structural rebuilds, watching, and unindexing.

mod common;

use std::sync::Arc;

use common::{people_db, write_person};
use sediment::{Database, Error, Event, MemoryBackend, MemorySource, Source, TableDefinition};
use serde_json::json;

#[tokio::test]
async fn history_folds_last_write_wins() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;
    write_person(&source, "1", "Frazee", "Paulina", json!([])).await;
    write_person(&source, "2", "Vancil", "Tara", json!([])).await;
    source.unlink("/people/2.json").await.unwrap();
    db.index_source(source, false).await.unwrap();

    let people = db.table("people").unwrap();
    assert_eq!(people.query().count().await.unwrap(), 1);
    let hit = people.get("mem://a/people/1.json").await.unwrap().unwrap();
    assert_eq!(hit.record["firstName"], "Paulina");
}

#[tokio::test]
async fn resync_when_converged_is_a_no_op() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;
    db.index_source(source.clone(), false).await.unwrap();

    let mut events = db.subscribe();
    db.sync_now("mem://a").await.unwrap();
    // converged: no new pass starts, the sync just reports the version
    match events.recv().await.unwrap() {
        Event::SourceIndexed { url, version } => {
            assert_eq!(url, "mem://a");
            assert_eq!(version, source.version());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn invalid_files_are_skipped_and_the_watermark_still_advances() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;
    source
        .write_file("/people/2.json", b"not json at all")
        .await
        .unwrap();
    write_person(&source, "3", "Vancil", "Tara", json!([])).await;

    let mut events = db.subscribe();
    db.index_source(source.clone(), false).await.unwrap();

    let people = db.table("people").unwrap();
    assert_eq!(people.query().count().await.unwrap(), 2);

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::ValidationFailed { url, .. } = event {
            failed.push(url);
        }
    }
    assert_eq!(failed, ["mem://a/people/2.json"]);

    // the bad file's version is covered: a re-sync does not retry it
    let version = db.wait_until_indexed("mem://a").await.unwrap();
    assert_eq!(version, source.version());
    let mut events = db.subscribe();
    db.sync_now("mem://a").await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::SourceIndexed { .. }
    ));
}

#[tokio::test]
async fn validate_hook_rejections_are_skipped() {
    let db = Database::builder()
        .define(
            TableDefinition::new("people")
                .index("lastName")
                .validate(|body| {
                    if body.get("lastName").is_some() {
                        Ok(())
                    } else {
                        Err(Error::Validation("lastName is required".into()))
                    }
                }),
        )
        .open()
        .await
        .unwrap();
    let source = Arc::new(MemorySource::new("mem://a"));
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;
    source
        .write_file("/people/2.json", json!({"firstName": "Anon"}).to_string().as_bytes())
        .await
        .unwrap();
    db.index_source(source, false).await.unwrap();

    assert_eq!(db.table("people").unwrap().query().count().await.unwrap(), 1);
}

#[tokio::test]
async fn definition_change_rebuilds_the_table() {
    let backend = Arc::new(MemoryBackend::new());
    let source = Arc::new(MemorySource::new("mem://a"));
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;

    let db = Database::builder()
        .backend(backend.clone())
        .define(TableDefinition::new("people").index("lastName"))
        .open()
        .await
        .unwrap();
    db.index_source(source.clone(), false).await.unwrap();
    assert_eq!(db.table("people").unwrap().query().count().await.unwrap(), 1);
    db.close();

    // same definition: records survive the reopen untouched
    let db = Database::builder()
        .backend(backend.clone())
        .define(TableDefinition::new("people").index("lastName"))
        .open()
        .await
        .unwrap();
    assert_eq!(db.table("people").unwrap().query().count().await.unwrap(), 1);
    db.close();

    // changed definition: table cleared, watermark reset, next sync
    // rebuilds from scratch with the new index
    let db = Database::builder()
        .backend(backend)
        .define(TableDefinition::new("people").index("firstName"))
        .open()
        .await
        .unwrap();
    let people = db.table("people").unwrap();
    assert_eq!(people.query().count().await.unwrap(), 0);

    db.index_source(source, false).await.unwrap();
    assert_eq!(people.query().count().await.unwrap(), 1);
    assert!(people
        .where_by("firstName")
        .equals("Paul")
        .unwrap()
        .first()
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn overlapping_patterns_resolve_in_definition_order() {
    let db = Database::builder()
        .define(TableDefinition::new("wide").file_pattern("/data/*.json"))
        .define(TableDefinition::new("narrow").file_pattern("/data/special.json"))
        .open()
        .await
        .unwrap();
    let source = Arc::new(MemorySource::new("mem://a"));
    source
        .write_file("/data/special.json", b"{\"kind\": \"special\"}")
        .await
        .unwrap();
    source
        .write_file("/data/other.json", b"{\"kind\": \"other\"}")
        .await
        .unwrap();
    db.index_source(source, false).await.unwrap();

    // the first defined table takes every matching file
    assert_eq!(db.table("wide").unwrap().query().count().await.unwrap(), 2);
    assert_eq!(db.table("narrow").unwrap().query().count().await.unwrap(), 0);
}

#[tokio::test]
async fn unindex_source_removes_its_records_and_watermark() {
    let db = people_db().await;
    let a = Arc::new(MemorySource::new("mem://a"));
    let b = Arc::new(MemorySource::new("mem://b"));
    write_person(&a, "1", "Frazee", "Paul", json!([])).await;
    write_person(&b, "1", "Vancil", "Tara", json!([])).await;
    db.index_source(a.clone(), false).await.unwrap();
    db.index_source(b, false).await.unwrap();

    db.unindex_source("mem://a").await.unwrap();
    let people = db.table("people").unwrap();
    let left = people.query().to_array().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].origin, "mem://b");

    // the watermark went too, so re-registering replays from version 0
    db.index_source(a, false).await.unwrap();
    assert_eq!(people.query().count().await.unwrap(), 2);
}

#[tokio::test]
async fn watched_sources_sync_in_the_background() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    db.index_source(source.clone(), true).await.unwrap();

    write_person(&source, "1", "Frazee", "Paul", json!([])).await;
    let version = db.wait_until_indexed("mem://a").await.unwrap();
    assert_eq!(version, 1);
    assert!(db
        .table("people")
        .unwrap()
        .get("mem://a/people/1.json")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn indexing_pass_emits_the_event_sequence() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;

    let mut events = db.subscribe();
    db.index_source(source, false).await.unwrap();

    let mut saw = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            Event::SourceIndexing {
                start_version,
                target_version,
                ..
            } => {
                assert_eq!((start_version, target_version), (0, 1));
                saw.push("indexing");
            }
            Event::SourceIndexProgress { tick, total, .. } => {
                assert_eq!((tick, total), (1, 1));
                saw.push("progress");
            }
            Event::PutRecord { table, record } => {
                assert_eq!(table, "people");
                assert_eq!(record.url, "mem://a/people/1.json");
                saw.push("put");
            }
            Event::IndexUpdated { table, version, .. } => {
                assert_eq!((table.as_str(), version), ("people", 1));
                saw.push("updated");
            }
            Event::SourceIndexed { version, .. } => {
                assert_eq!(version, 1);
                saw.push("indexed");
                break;
            }
            Event::ValidationFailed { url, error } => {
                panic!("unexpected failure for {url}: {error}");
            }
        }
    }
    assert_eq!(saw, ["indexing", "put", "progress", "updated", "indexed"]);
}

#[tokio::test]
async fn deleting_a_never_indexed_path_updates_no_table() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    // created and removed before the first sync: the fold leaves only a
    // Del for a record the store never held
    write_person(&source, "1", "Frazee", "Paul", json!([])).await;
    source.unlink("/people/1.json").await.unwrap();

    let mut events = db.subscribe();
    db.index_source(source.clone(), false).await.unwrap();

    loop {
        match events.recv().await.unwrap() {
            Event::IndexUpdated { table, .. } => {
                panic!("no table state changed, yet {table} reported an update");
            }
            Event::SourceIndexed { version, .. } => {
                assert_eq!(version, source.version());
                break;
            }
            _ => {}
        }
    }
    assert_eq!(db.table("people").unwrap().query().count().await.unwrap(), 0);
}

#[tokio::test]
async fn closed_database_rejects_operations() {
    let db = people_db().await;
    let source = Arc::new(MemorySource::new("mem://a"));
    db.index_source(source, false).await.unwrap();
    db.close();
    assert!(!db.is_open());

    let people = db.table("people").unwrap();
    assert!(matches!(
        people.query().count().await.unwrap_err(),
        Error::Closed
    ));
    assert!(matches!(db.sync_now("mem://a").await.unwrap_err(), Error::Closed));
}
