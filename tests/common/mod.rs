//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use sediment::{Database, MemorySource, Source, TableDefinition};
use serde_json::{json, Value};

/// `RUST_LOG=debug cargo test` shows the indexer's skip/rebuild logging.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn people_def() -> TableDefinition {
    TableDefinition::new("people")
        .index("lastName")
        .index("lastName+firstName")
        .index("*attributes")
}

pub async fn people_db() -> Database {
    init_logging();
    Database::builder()
        .define(people_def())
        .open()
        .await
        .unwrap()
}

pub async fn write_person(
    source: &MemorySource,
    id: &str,
    last: &str,
    first: &str,
    attributes: Value,
) {
    let body = json!({
        "lastName": last,
        "firstName": first,
        "attributes": attributes,
    });
    source
        .write_file(
            &format!("/people/{id}.json"),
            body.to_string().as_bytes(),
        )
        .await
        .unwrap();
}

/// Ten posts `p0..p9` with a zero-padded `order` field and a numeric
/// `slot`, alternating `color` between red and blue.
pub async fn posts_fixture() -> (Database, Arc<MemorySource>) {
    init_logging();
    let db = Database::builder()
        .define(
            TableDefinition::new("posts")
                .primary_key("id")
                .index("order")
                .index("color"),
        )
        .open()
        .await
        .unwrap();
    let source = Arc::new(MemorySource::new("mem://posts"));
    for slot in 0..10u64 {
        let body = json!({
            "id": format!("p{slot}"),
            "order": format!("{slot:02}"),
            "slot": slot,
            "color": if slot % 2 == 0 { "red" } else { "blue" },
        });
        source
            .write_file(
                &format!("/posts/p{slot}.json"),
                body.to_string().as_bytes(),
            )
            .await
            .unwrap();
    }
    db.index_source(source.clone(), false).await.unwrap();
    (db, source)
}
