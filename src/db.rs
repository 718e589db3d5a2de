//! Database assembly: tables, sources, watchers, events, lifecycle.
//!
//! A [`Database`] is built once from table definitions via
//! [`DatabaseBuilder`], then fed sources with
//! [`index_source`](Database::index_source). Opening runs the definition
//! checksum check and rebuilds any table whose structure changed since the
//! backing store was last used.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use log::debug;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::Event;
use crate::indexer;
use crate::lock::LockRegistry;
use crate::schema::TableDefinition;
use crate::source::Source;
use crate::storage::{Backend, MemoryBackend};
use crate::table::{Table, TableCore};

const DEFAULT_EVENT_CAPACITY: usize = 256;

pub(crate) struct SourceHandle {
    pub source: Arc<dyn Source>,
    /// Captured at registration; write-back skips sources registered as
    /// non-writable without consulting them again.
    pub writable: bool,
}

/// Shared state behind [`Database`], [`Table`](crate::Table), and
/// [`Query`](crate::Query) handles.
pub(crate) struct DbCore {
    pub backend: Arc<dyn Backend>,
    pub locks: Arc<LockRegistry>,
    pub tables: Vec<Arc<TableCore>>,
    pub sources: StdRwLock<HashMap<String, SourceHandle>>,
    watchers: StdMutex<HashMap<String, JoinHandle<()>>>,
    events: broadcast::Sender<Event>,
    open: AtomicBool,
}

impl DbCore {
    pub fn emit(&self, event: Event) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// The registered source at `origin`, when present and writable.
    pub fn writable_source(&self, origin: &str) -> Option<Arc<dyn Source>> {
        let sources = self.sources.read().unwrap();
        sources
            .get(origin)
            .filter(|handle| handle.writable)
            .map(|handle| handle.source.clone())
    }

    pub fn source(&self, url: &str) -> Option<Arc<dyn Source>> {
        let sources = self.sources.read().unwrap();
        sources.get(url).map(|handle| handle.source.clone())
    }

    /// Split a record url into `(origin, path)` against the registered
    /// sources, preferring the longest matching origin. The origin must end
    /// at a path boundary: `mem://ab/x.json` does not belong to `mem://a`.
    pub fn split_url(&self, url: &str) -> Option<(String, String)> {
        let sources = self.sources.read().unwrap();
        sources
            .keys()
            .filter(|origin| {
                url.strip_prefix(origin.as_str())
                    .is_some_and(|path| path.starts_with('/'))
            })
            .max_by_key(|origin| origin.len())
            .map(|origin| (origin.clone(), url[origin.len()..].to_string()))
    }
}

/// Builder for [`Database`]. Table definitions are validated at
/// [`open`](DatabaseBuilder::open).
pub struct DatabaseBuilder {
    backend: Option<Arc<dyn Backend>>,
    tables: Vec<TableDefinition>,
    event_capacity: usize,
}

impl DatabaseBuilder {
    /// Storage engine to build on. Defaults to a fresh [`MemoryBackend`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Add a table. Changed files resolve to tables in definition order:
    /// when two file patterns overlap, the first defined table takes the
    /// file.
    pub fn define(mut self, def: TableDefinition) -> Self {
        self.tables.push(def);
        self
    }

    /// Broadcast buffer size for [`Database::subscribe`] receivers.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate definitions, wire up the stores, and run the structural
    /// checksum check against the backing store.
    pub async fn open(self) -> Result<Database> {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let locks = Arc::new(LockRegistry::new());
        let mut names = std::collections::HashSet::new();
        let mut tables = Vec::with_capacity(self.tables.len());
        for def in self.tables {
            let core = TableCore::new(def, backend.clone(), locks.clone())?;
            if !names.insert(core.name.clone()) {
                return Err(Error::schema(format!("duplicate table {:?}", core.name)));
            }
            tables.push(Arc::new(core));
        }
        let (events, _) = broadcast::channel(self.event_capacity);
        let core = Arc::new(DbCore {
            backend,
            locks,
            tables,
            sources: StdRwLock::new(HashMap::new()),
            watchers: StdMutex::new(HashMap::new()),
            events,
            open: AtomicBool::new(true),
        });
        let rebuilt = indexer::reset_outdated_tables(&core).await?;
        if !rebuilt.is_empty() {
            debug!("rebuilt tables: {}", rebuilt.join(", "));
        }
        Ok(Database { core })
    }
}

/// An open database: a set of tables indexed over a set of sources.
///
/// Cheap to clone; all clones share state. Dropping the last clone does not
/// stop background watchers, [`close`](Database::close) does.
#[derive(Clone)]
pub struct Database {
    core: Arc<DbCore>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder {
            backend: None,
            tables: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Handle to the table named `name`.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.core
            .tables
            .iter()
            .find(|core| core.name == name)
            .map(|core| Table {
                db: self.core.clone(),
                core: core.clone(),
            })
    }

    pub fn tables(&self) -> Vec<Table> {
        self.core
            .tables
            .iter()
            .map(|core| Table {
                db: self.core.clone(),
                core: core.clone(),
            })
            .collect()
    }

    /// Subscribe to indexing and record events. A receiver that falls
    /// behind the event capacity sees a `Lagged` error, never backpressure.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.core.events.subscribe()
    }

    /// Register a source and sync it to convergence. With `watch`, also
    /// follow its file-activity stream and re-sync on every relevant
    /// change until the database closes. Registering an already known
    /// source just re-syncs it.
    pub async fn index_source(&self, source: Arc<dyn Source>, watch: bool) -> Result<()> {
        self.core.ensure_open()?;
        let url = source.url().to_string();
        let writable = source.info().await?.is_writable;
        self.core.sources.write().unwrap().insert(
            url.clone(),
            SourceHandle {
                source: source.clone(),
                writable,
            },
        );
        if writable {
            // lay out the per-record directories so write-back has
            // somewhere to put files; an existing directory is fine
            for table in &self.core.tables {
                if table.def.singular {
                    continue;
                }
                if let Err(err) = source.mkdir(&format!("/{}", table.name)).await {
                    debug!("{url}: mkdir /{}: {err}", table.name);
                }
            }
        }
        if watch {
            let mut watchers = self.core.watchers.lock().unwrap();
            if !watchers.contains_key(&url) {
                let handle = indexer::watch_source(self.core.clone(), source.clone())?;
                watchers.insert(url.clone(), handle);
            }
        }
        indexer::sync_source(&self.core, &source).await
    }

    /// Forget a source: stop its watcher and remove every record it
    /// contributed plus its watermark. Unknown urls are a no-op.
    pub async fn unindex_source(&self, url: &str) -> Result<()> {
        self.core.ensure_open()?;
        if let Some(handle) = self.core.watchers.lock().unwrap().remove(url) {
            handle.abort();
        }
        self.core.sources.write().unwrap().remove(url);
        indexer::unindex_source(&self.core, url).await
    }

    /// Re-sync one registered source now.
    pub async fn sync_now(&self, url: &str) -> Result<()> {
        self.core.ensure_open()?;
        let source = self
            .core
            .source(url)
            .ok_or_else(|| Error::query(format!("{url} is not a registered source")))?;
        indexer::sync_source(&self.core, &source).await
    }

    /// Resolve when `url`'s watermark has reached the source's current
    /// version, returning that version. Useful with watched sources, whose
    /// syncs run in the background.
    pub async fn wait_until_indexed(&self, url: &str) -> Result<u64> {
        self.core.ensure_open()?;
        let source = self
            .core
            .source(url)
            .ok_or_else(|| Error::query(format!("{url} is not a registered source")))?;
        // subscribe before the check so a sync finishing in between is not
        // missed
        let mut events = self.subscribe();
        loop {
            let target = source.info().await?;
            let meta = indexer::read_meta(&self.core, url).await?;
            if meta.version >= target.version {
                return Ok(meta.version);
            }
            loop {
                match events.recv().await {
                    Ok(Event::SourceIndexed { url: done, .. }) if done == url => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::Closed),
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// Stop watchers and reject further operations. Idempotent.
    pub fn close(&self) {
        self.core.open.store(false, Ordering::SeqCst);
        let mut watchers = self.core.watchers.lock().unwrap();
        for (_, handle) in watchers.drain() {
            handle.abort();
        }
    }
}
