//! Consumer-facing notifications.
//!
//! Events ride a `tokio::sync::broadcast` channel obtained from
//! [`Database::subscribe`](crate::Database::subscribe). Delivery is
//! at-least-once per live receiver with no ordering guarantee across
//! sources; a receiver that falls behind the channel capacity observes a
//! `Lagged` error rather than blocking the indexer.

use crate::record::Record;

#[derive(Debug, Clone)]
pub enum Event {
    /// An indexing pass started for a source.
    SourceIndexing {
        url: String,
        start_version: u64,
        target_version: u64,
    },
    /// One change of the current pass was applied (or skipped).
    SourceIndexProgress { url: String, tick: usize, total: usize },
    /// A source converged at `version`.
    SourceIndexed { url: String, version: u64 },
    /// A record was written into a table's primary store.
    PutRecord { table: String, record: Record },
    /// A table received at least one write while indexing `source`.
    IndexUpdated {
        table: String,
        source: String,
        version: u64,
    },
    /// An individual file failed to parse or validate and was skipped.
    ValidationFailed { url: String, error: String },
}
