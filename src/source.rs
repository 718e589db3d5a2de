//! The source collaborator interface.
//!
//! A source is an externally owned, append-versioned file tree this crate
//! indexes but does not own: it exposes a monotonically increasing version,
//! an ordered change history, per-file read/write, and a file-activity
//! stream. All durability and versioning of source content is the source's
//! responsibility; the local store is a derived cache.
//!
//! [`MemorySource`] is the in-process reference implementation, used by the
//! test suite and by embedders without a real repository backend.

use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use globset::{GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::schema::compile_pattern;

/// Snapshot of a source's identity and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Current version; increases by one per file mutation.
    pub version: u64,
    /// Whether this process may write files into the source.
    pub is_writable: bool,
    /// Author url, when the source carries one.
    pub author: Option<String>,
}

/// One entry of a source's change history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub path: String,
    pub change: ChangeType,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Put,
    Del,
}

/// File metadata returned by [`Source::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
}

/// Notification on a source's file-activity stream.
///
/// `Invalidated` announces a path changed in a version not yet available
/// locally (the watcher responds by requesting a download); `Changed` means
/// new content has arrived and a re-sync is warranted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileActivity {
    Invalidated { path: String },
    Changed { path: String },
}

/// An externally versioned file repository.
///
/// Consumed, not implemented, by the indexing core; see the module docs.
/// `history` covers versions in `[start, end)`. `stat` returns
/// [`Error::NotFound`] for absent paths.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable url identifying this source; record urls are `url + path`.
    fn url(&self) -> &str;

    async fn info(&self) -> Result<SourceInfo>;

    async fn history(&self, start: u64, end: u64) -> Result<Vec<HistoryEntry>>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn unlink(&self, path: &str) -> Result<()>;

    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// List names directly under `path` (or all descendant paths when
    /// `recursive`).
    async fn readdir(&self, path: &str, recursive: bool) -> Result<Vec<String>>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Subscribe to file activity for paths matching any of `patterns`.
    /// Dropping the receiver detaches the subscription.
    fn activity(&self, patterns: &[String]) -> Result<mpsc::UnboundedReceiver<FileActivity>>;

    /// Ensure the content for `path` is available locally.
    async fn download(&self, path: &str) -> Result<()>;
}

struct Watcher {
    globs: GlobSet,
    tx: mpsc::UnboundedSender<FileActivity>,
}

struct MemoryInner {
    version: u64,
    writable: bool,
    files: BTreeMap<String, Vec<u8>>,
    history: Vec<HistoryEntry>,
    watchers: Vec<Watcher>,
}

/// In-process append-versioned file tree implementing [`Source`].
///
/// Every `write_file`/`unlink` bumps the version, appends a history entry,
/// and notifies matching activity watchers (an `Invalidated` followed by a
/// `Changed`, mirroring a remote source announcing and then delivering a
/// change). Content is already local, so `download` is a no-op.
pub struct MemorySource {
    url: String,
    inner: StdMutex<MemoryInner>,
}

impl MemorySource {
    /// Create a writable source. Trailing slashes are trimmed from the url
    /// so `url + path` concatenation stays unambiguous.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            inner: StdMutex::new(MemoryInner {
                version: 0,
                writable: true,
                files: BTreeMap::new(),
                history: Vec::new(),
                watchers: Vec::new(),
            }),
        }
    }

    /// Create a source this process may not write into.
    pub fn read_only(url: impl Into<String>) -> Self {
        let source = Self::new(url);
        source.inner.lock().unwrap().writable = false;
        source
    }

    pub fn set_writable(&self, writable: bool) {
        self.inner.lock().unwrap().writable = writable;
    }

    /// Current version without going through the async trait.
    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    fn notify(inner: &mut MemoryInner, path: &str) {
        inner.watchers.retain(|watcher| {
            if !watcher.globs.is_match(path) {
                return true;
            }
            let invalidated = watcher.tx.send(FileActivity::Invalidated {
                path: path.to_string(),
            });
            let changed = watcher.tx.send(FileActivity::Changed {
                path: path.to_string(),
            });
            // drop subscriptions whose receiver is gone
            invalidated.is_ok() && changed.is_ok()
        });
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[async_trait]
impl Source for MemorySource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn info(&self) -> Result<SourceInfo> {
        let inner = self.inner.lock().unwrap();
        Ok(SourceInfo {
            version: inner.version,
            is_writable: inner.writable,
            author: None,
        })
    }

    async fn history(&self, start: u64, end: u64) -> Result<Vec<HistoryEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .history
            .iter()
            .filter(|entry| entry.version >= start && entry.version < end)
            .cloned()
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}{}", self.url, path)))
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let path = normalize_path(path);
        let mut inner = self.inner.lock().unwrap();
        inner.version += 1;
        let version = inner.version;
        inner.files.insert(path.clone(), bytes.to_vec());
        inner.history.push(HistoryEntry {
            path: path.clone(),
            change: ChangeType::Put,
            version,
        });
        Self::notify(&mut inner, &path);
        Ok(())
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let mut inner = self.inner.lock().unwrap();
        if inner.files.remove(&path).is_none() {
            return Err(Error::NotFound(format!("{}{}", self.url, path)));
        }
        inner.version += 1;
        let version = inner.version;
        inner.history.push(HistoryEntry {
            path: path.clone(),
            change: ChangeType::Del,
            version,
        });
        Self::notify(&mut inner, &path);
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = normalize_path(path);
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(&path)
            .map(|bytes| FileStat {
                size: bytes.len() as u64,
            })
            .ok_or_else(|| Error::NotFound(format!("{}{}", self.url, path)))
    }

    async fn readdir(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let mut dir = normalize_path(path);
        if !dir.ends_with('/') {
            dir.push('/');
        }
        let inner = self.inner.lock().unwrap();
        let mut names = Vec::new();
        for file in inner.files.keys() {
            let Some(rest) = file.strip_prefix(&dir) else {
                continue;
            };
            if !recursive && rest.contains('/') {
                continue;
            }
            names.push(rest.to_string());
        }
        Ok(names)
    }

    async fn mkdir(&self, _path: &str) -> Result<()> {
        // directories are implicit in the flat file map
        Ok(())
    }

    fn activity(&self, patterns: &[String]) -> Result<mpsc::UnboundedReceiver<FileActivity>> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(compile_pattern(pattern)?.glob().clone());
        }
        let globs = builder
            .build()
            .map_err(|err| Error::parameter(format!("invalid activity patterns: {err}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().watchers.push(Watcher { globs, tx });
        Ok(rx)
    }

    async fn download(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn versions_and_history() {
        let source = MemorySource::new("mem://a/");
        assert_eq!(source.url(), "mem://a");
        assert_eq!(source.info().await.unwrap().version, 0);

        source.write_file("/one.json", b"{}").await.unwrap();
        source.write_file("/two.json", b"{}").await.unwrap();
        source.unlink("/one.json").await.unwrap();
        assert_eq!(source.info().await.unwrap().version, 3);

        let history = source.history(1, 4).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].change, ChangeType::Del);
        assert_eq!(history[2].version, 3);

        // half-open window
        let window = source.history(2, 3).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].path, "/two.json");
    }

    #[tokio::test]
    async fn stat_and_readdir() {
        let source = MemorySource::new("mem://a");
        source.write_file("/posts/1.json", b"{\"a\":1}").await.unwrap();
        source.write_file("/posts/2.json", b"{}").await.unwrap();
        source.write_file("/posts/deep/3.json", b"{}").await.unwrap();

        assert_eq!(source.stat("/posts/1.json").await.unwrap().size, 7);
        assert!(source.stat("/missing.json").await.unwrap_err().is_not_found());

        let names = source.readdir("/posts", false).await.unwrap();
        assert_eq!(names, ["1.json", "2.json"]);
        let all = source.readdir("/posts", true).await.unwrap();
        assert_eq!(all, ["1.json", "2.json", "deep/3.json"]);
    }

    #[tokio::test]
    async fn activity_stream_filters_by_pattern() {
        let source = MemorySource::new("mem://a");
        let mut rx = source.activity(&["/posts/*.json".to_string()]).unwrap();

        source.write_file("/ignored.txt", b"x").await.unwrap();
        source.write_file("/posts/1.json", b"{}").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            FileActivity::Invalidated {
                path: "/posts/1.json".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            FileActivity::Changed {
                path: "/posts/1.json".into()
            }
        );

        // dropping the receiver detaches the watcher on the next notify
        drop(rx);
        source.write_file("/posts/2.json", b"{}").await.unwrap();
        assert!(source.inner.lock().unwrap().watchers.is_empty());
    }
}
