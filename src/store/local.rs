//! In-process record store, optionally backed by a JSON data file.
//!
//! [`LocalStore`] keeps a [`Database`] snapshot behind a lock and publishes every
//! successful write on a per-collection broadcast channel. When file-backed, each
//! write is saved atomically before it is published, and [`LocalStore::watch_file`]
//! turns writes made by other processes into change-feed events as well.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Change, Page, Record, RecordFilter, RecordStore, Subscription};
use crate::db::Database;
use crate::error::{BoardError, Result};
use crate::task::Task;
use crate::volunteer::{Completion, Volunteer};

/// Default number of buffered events per collection before a slow subscriber lags.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Per-collection change-feed senders.
#[derive(Debug)]
pub struct Feeds {
    pub(crate) tasks: broadcast::Sender<Change<Task>>,
    pub(crate) volunteers: broadcast::Sender<Change<Volunteer>>,
    pub(crate) completions: broadcast::Sender<Change<Completion>>,
}

impl Feeds {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Feeds {
            tasks: broadcast::channel(capacity).0,
            volunteers: broadcast::channel(capacity).0,
            completions: broadcast::channel(capacity).0,
        }
    }
}

/// Record store over an in-memory snapshot.
#[derive(Debug)]
pub struct LocalStore {
    state: RwLock<Database>,
    path: Option<PathBuf>,
    feeds: Feeds,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> BoardError {
    BoardError::storage("lock poisoned")
}

impl LocalStore {
    /// Creates an empty store with no backing file.
    pub fn in_memory() -> Self {
        Self::from_database(Database::default(), None, DEFAULT_FEED_CAPACITY)
    }

    /// Opens a file-backed store, loading the current contents of `path`.
    pub fn open(path: &Path, feed_capacity: usize) -> Result<Self> {
        let db = Database::load(path)?;
        Ok(Self::from_database(db, Some(path.to_path_buf()), feed_capacity))
    }

    pub fn from_database(db: Database, path: Option<PathBuf>, feed_capacity: usize) -> Self {
        LocalStore {
            state: RwLock::new(db),
            path,
            feeds: Feeds::new(feed_capacity),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a copy of every collection.
    pub fn snapshot(&self) -> Result<Database> {
        let db = self.state.read().map_err(poison_err)?;
        Ok(db.clone())
    }

    /// Runs `op` against one collection and persists the result.
    ///
    /// A file-backed store first re-reads the file, so `op` sees and keeps every
    /// record other processes have saved; those records are published before the
    /// write itself. If saving fails the collection is restored, so memory never
    /// runs ahead of disk.
    fn write<R: Record, T>(&self, op: impl FnOnce(&mut Vec<R>) -> Result<T>) -> Result<T> {
        let mut db = self.state.write().map_err(poison_err)?;
        let Some(path) = &self.path else {
            return op(R::table_mut(&mut db));
        };

        let fresh = Database::load(path)?;
        let external = ChangeSet::between(&db, &fresh);
        *db = fresh;
        if !external.is_empty() {
            debug!(changes = external.len(), path = %path.display(), "merged external writes");
        }
        external.publish(self);

        let before = R::table(&db).clone();
        let out = op(R::table_mut(&mut db))?;
        if let Err(e) = db.save(path) {
            *R::table_mut(&mut db) = before;
            return Err(e);
        }
        Ok(out)
    }

    fn publish<R: Record>(&self, change: Change<R>) {
        // A send error only means nobody is subscribed.
        let _ = R::feed(&self.feeds).send(change);
    }

    /// Re-reads the backing file and publishes whatever differs from memory.
    ///
    /// Returns the number of changes published.
    pub fn reload_from_disk(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let changes = {
            let mut db = self.state.write().map_err(poison_err)?;
            let fresh = Database::load(path)?;
            let changes = ChangeSet::between(&db, &fresh);
            *db = fresh;
            changes
        };
        let count = changes.len();
        changes.publish(self);
        Ok(count)
    }

    /// Polls the backing file and republishes writes made by other processes.
    ///
    /// Returns `None` for an in-memory store.
    pub fn watch_file(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        let path = self.path.clone()?;
        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut last_seen = file_stamp(&path);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let stamp = file_stamp(&path);
                if stamp == last_seen {
                    continue;
                }
                last_seen = stamp;
                match store.reload_from_disk() {
                    Ok(0) => {}
                    Ok(changes) => debug!(changes, path = %path.display(), "picked up external writes"),
                    Err(e) => warn!(error = %e, path = %path.display(), "failed to reload data file"),
                }
            }
        }))
    }
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// The events that turn one snapshot into another, per collection.
struct ChangeSet {
    tasks: Vec<Change<Task>>,
    volunteers: Vec<Change<Volunteer>>,
    completions: Vec<Change<Completion>>,
}

impl ChangeSet {
    fn between(old: &Database, new: &Database) -> Self {
        ChangeSet {
            tasks: diff(&old.tasks, &new.tasks),
            volunteers: diff(&old.volunteers, &new.volunteers),
            completions: diff(&old.completions, &new.completions),
        }
    }

    fn len(&self) -> usize {
        self.tasks.len() + self.volunteers.len() + self.completions.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(self, store: &LocalStore) {
        self.tasks.into_iter().for_each(|c| store.publish(c));
        self.volunteers.into_iter().for_each(|c| store.publish(c));
        self.completions.into_iter().for_each(|c| store.publish(c));
    }
}

/// Computes the change events that turn `old` into `new`, matching records by id.
pub fn diff<R: Record>(old: &[R], new: &[R]) -> Vec<Change<R>> {
    let before: HashMap<&R::Id, &R> = old.iter().map(|r| (r.id(), r)).collect();
    let after: HashSet<&R::Id> = new.iter().map(Record::id).collect();

    let mut changes = Vec::new();
    for record in new {
        match before.get(record.id()) {
            None => changes.push(Change::created(record.clone())),
            Some(prev) if *prev != record => changes.push(Change::updated(record.clone())),
            Some(_) => {}
        }
    }
    for record in old {
        if !after.contains(record.id()) {
            changes.push(Change::deleted(record.clone()));
        }
    }
    changes
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn get<R: Record>(&self, id: &R::Id) -> Result<Option<R>> {
        let found = {
            let db = self.state.read().map_err(poison_err)?;
            R::table(&db).iter().find(|r| r.id() == id).cloned()
        };
        Ok(found)
    }

    async fn list<R: Record>(&self, filter: &dyn RecordFilter<R>, page: Option<Page>) -> Result<Vec<R>> {
        let mut rows: Vec<R> = {
            let db = self.state.read().map_err(poison_err)?;
            R::table(&db).iter().filter(|r| filter.matches(r)).cloned().collect()
        };
        rows.sort_by(|a, b| filter.order(a, b));
        Ok(match page {
            Some(page) => page.slice(rows),
            None => rows,
        })
    }

    async fn create<R: Record>(&self, record: R) -> Result<R> {
        let stored = self.write::<R, _>(|rows| {
            if rows.iter().any(|r| r.id() == record.id()) {
                return Err(BoardError::storage(format!(
                    "duplicate {} id {}",
                    R::COLLECTION,
                    record.id()
                )));
            }
            rows.push(record.clone());
            Ok(record)
        })?;
        self.publish(Change::created(stored.clone()));
        Ok(stored)
    }

    async fn update<R: Record>(&self, record: R) -> Result<R> {
        let stored = self.write::<R, _>(|rows| {
            let slot = rows
                .iter_mut()
                .find(|r| r.id() == record.id())
                .ok_or_else(|| BoardError::not_found(R::COLLECTION, record.id()))?;
            *slot = record.clone();
            Ok(record)
        })?;
        self.publish(Change::updated(stored.clone()));
        Ok(stored)
    }

    async fn delete<R: Record>(&self, id: &R::Id) -> Result<()> {
        let removed = self.write::<R, _>(|rows| {
            let pos = rows
                .iter()
                .position(|r| r.id() == id)
                .ok_or_else(|| BoardError::not_found(R::COLLECTION, id))?;
            Ok(rows.remove(pos))
        })?;
        self.publish(Change::deleted(removed));
        Ok(())
    }

    fn subscribe<R: Record>(&self) -> Subscription<R> {
        Subscription::new(R::feed(&self.feeds).subscribe())
    }
}
