//! Ordered key-value storage abstraction.
//!
//! The [`Backend`] trait defines the storage operations the index layer
//! builds on, enabling pluggable engines (in-memory, embedded KV stores,
//! future persistent backends). Implementations must provide atomic
//! single-key put/get/delete and ordered range iteration per keyspace, and
//! must be `Send + Sync` to work with async runtimes.
//!
//! Keyspace layout used by the crate:
//!
//! | Keyspace | Contents |
//! |----------|----------|
//! | `<table>/_` | primary records, `url -> record wrapper` |
//! | `<table>/<index>` | derived entries, `key -> [url, ...]` |
//! | `_index_meta` | `source url -> {url, version}` watermark |
//! | `_checksums` | `table name -> definition checksum` |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryBackend;

/// Half-open or closed range bounds over string-ordered keys.
///
/// Bounds compare by byte order of the key string. For compound keys this is
/// the order of the `!`-joined form, which is not component-wise numeric
/// order; callers must encode components so string order matches intended
/// order (zero-pad numbers, avoid mixing encodings).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanBounds {
    pub gt: Option<String>,
    pub gte: Option<String>,
    pub lt: Option<String>,
    pub lte: Option<String>,
}

impl ScanBounds {
    /// Unbounded scan over the whole keyspace.
    pub fn all() -> Self {
        Self::default()
    }

    /// Exact-key bound (`gte = lte = key`).
    pub fn only(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            gte: Some(key.clone()),
            lte: Some(key),
            ..Self::default()
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }
}

/// Iteration direction for [`Backend::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Abstract ordered key-value engine, partitioned into named keyspaces.
///
/// All operations are async (via `async-trait`); in-memory implementations
/// return immediately-ready futures. A keyspace springs into existence on
/// first write and an empty keyspace scans as empty.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read one key. `Ok(None)` on miss.
    async fn get(&self, keyspace: &str, key: &str) -> Result<Option<String>>;

    /// Write one key, replacing any existing value.
    async fn put(&self, keyspace: &str, key: &str, value: &str) -> Result<()>;

    /// Delete one key. Deleting an absent key is not an error.
    async fn delete(&self, keyspace: &str, key: &str) -> Result<()>;

    /// Ordered iteration over `[bounds]` in `direction`.
    ///
    /// Returns `(key, value)` pairs. An inverted or empty range yields an
    /// empty vec rather than an error.
    async fn scan(
        &self,
        keyspace: &str,
        bounds: &ScanBounds,
        direction: Direction,
    ) -> Result<Vec<(String, String)>>;

    /// Drop every key in the keyspace.
    async fn clear(&self, keyspace: &str) -> Result<()>;
}
