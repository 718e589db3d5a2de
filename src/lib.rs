//! # Sediment
//!
//! An indexing and query layer over externally versioned file
//! repositories.
//!
//! Sediment watches JSON documents living in append-versioned sources it
//! does not own, folds their change history into per-table secondary
//! indexes over an ordered key-value store, and exposes an indexed-db
//! style query surface (where clauses, ordering, offset/limit, filters,
//! write-back). The local store is a derived cache: the sources stay the
//! system of record, and any table can be rebuilt from them at any time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │   Sources    │──▶│   Indexer   │──▶│ IndexedStore  │
//! │ history+files│   │ watermarks  │   │ primary+index │
//! └──────────────┘   └─────────────┘   └───────┬───────┘
//!        ▲                                     │
//!        │ write-back                          ▼
//! ┌──────┴───────┐                      ┌──────────────┐
//! │ Table::put   │◀─────────────────────│    Query     │
//! │ Query::update│                      │ where/order  │
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sediment::{Database, MemorySource, Source, TableDefinition};
//!
//! # async fn run() -> sediment::Result<()> {
//! let db = Database::builder()
//!     .define(TableDefinition::new("people").index("lastName"))
//!     .open()
//!     .await?;
//!
//! let source = Arc::new(MemorySource::new("mem://alice"));
//! source
//!     .write_file("/people/1.json", br#"{"lastName": "Vancil"}"#)
//!     .await?;
//! db.index_source(source, true).await?;
//!
//! let people = db.table("people").unwrap();
//! let hit = people.where_by("lastName").equals("Vancil")?.first().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Database assembly and lifecycle |
//! | [`schema`] | Table definitions and index declarations |
//! | [`table`] | Per-table read/write surface |
//! | [`query`] | Lazy bounded walks, write-back |
//! | [`where_clause`] | Where-clause relations |
//! | [`indexed`] | Secondary-index store |
//! | [`indexer`] | Incremental history folding |
//! | [`source`] | Source trait and in-memory source |
//! | [`storage`] | Ordered key-value backend trait |
//! | [`record`] | Record wrapper and watermarks |
//! | [`events`] | Broadcast notifications |
//! | [`lock`] | Keyed async lock registry |
//! | [`error`] | Error taxonomy |

pub mod db;
pub mod error;
pub mod events;
pub mod indexed;
mod indexer;
mod keys;
pub mod lock;
pub mod query;
pub mod record;
pub mod schema;
pub mod source;
pub mod storage;
pub mod table;
pub mod where_clause;

pub use db::{Database, DatabaseBuilder};
pub use error::{Error, Result};
pub use events::Event;
pub use indexed::IndexedStore;
pub use query::Query;
pub use record::{IndexMeta, Record};
pub use schema::{IndexSpec, TableDefinition};
pub use source::{
    ChangeType, FileActivity, FileStat, HistoryEntry, MemorySource, Source, SourceInfo,
};
pub use storage::{Backend, Direction, MemoryBackend, ScanBounds};
pub use table::Table;
pub use where_clause::WhereBuilder;
