//! Record Store contract.
//!
//! The board core never talks to other clients directly: it writes records through a
//! [`RecordStore`] and every connected view learns about the write from the store's
//! per-collection change feed.
//!
//! ## Contract
//!
//! - **No transactions**: each call is an independent write. Multi-write sequences
//!   (see [`crate::crediting`]) order and compensate for themselves.
//! - **Last write wins**: `update` replaces the whole record.
//! - **Publish after write**: a [`Change`] is published only once the write is durable.

pub mod local;

#[cfg(test)]
pub mod faulty;

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::db::Database;
use crate::error::{BoardError, Result};
use crate::fields::{CompletionId, TaskId, VolunteerId};
use crate::task::Task;
use crate::volunteer::{Completion, Volunteer};

pub use local::LocalStore;

/// The record collections the board keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tasks,
    Volunteers,
    Completions,
}

impl Collection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Volunteers => "volunteers",
            Collection::Completions => "completions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type stored in one collection.
pub trait Record: fmt::Debug + Clone + PartialEq + Send + Sync + 'static {
    type Id: fmt::Debug + fmt::Display + Clone + Eq + Hash + Send + Sync + 'static;

    const COLLECTION: Collection;

    fn id(&self) -> &Self::Id;

    fn table(db: &Database) -> &Vec<Self>;

    fn table_mut(db: &mut Database) -> &mut Vec<Self>;

    fn feed(feeds: &local::Feeds) -> &broadcast::Sender<Change<Self>>;
}

impl Record for Task {
    type Id = TaskId;
    const COLLECTION: Collection = Collection::Tasks;

    fn id(&self) -> &TaskId {
        &self.id
    }

    fn table(db: &Database) -> &Vec<Self> {
        &db.tasks
    }

    fn table_mut(db: &mut Database) -> &mut Vec<Self> {
        &mut db.tasks
    }

    fn feed(feeds: &local::Feeds) -> &broadcast::Sender<Change<Self>> {
        &feeds.tasks
    }
}

impl Record for Volunteer {
    type Id = VolunteerId;
    const COLLECTION: Collection = Collection::Volunteers;

    fn id(&self) -> &VolunteerId {
        &self.id
    }

    fn table(db: &Database) -> &Vec<Self> {
        &db.volunteers
    }

    fn table_mut(db: &mut Database) -> &mut Vec<Self> {
        &mut db.volunteers
    }

    fn feed(feeds: &local::Feeds) -> &broadcast::Sender<Change<Self>> {
        &feeds.volunteers
    }
}

impl Record for Completion {
    type Id = CompletionId;
    const COLLECTION: Collection = Collection::Completions;

    fn id(&self) -> &CompletionId {
        &self.id
    }

    fn table(db: &Database) -> &Vec<Self> {
        &db.completions
    }

    fn table_mut(db: &mut Database) -> &mut Vec<Self> {
        &mut db.completions
    }

    fn feed(feeds: &local::Feeds) -> &broadcast::Sender<Change<Self>> {
        &feeds.completions
    }
}

/// Kind of write a change-feed event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// One change-feed event. Deletes carry the record as it was before removal.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<R> {
    pub action: ChangeAction,
    pub record: R,
}

impl<R> Change<R> {
    pub fn created(record: R) -> Self {
        Change { action: ChangeAction::Create, record }
    }

    pub fn updated(record: R) -> Self {
        Change { action: ChangeAction::Update, record }
    }

    pub fn deleted(record: R) -> Self {
        Change { action: ChangeAction::Delete, record }
    }
}

/// Membership predicate plus a total order for a list of records.
///
/// The same filter drives both a full `list` and incremental fan-out, so a list kept
/// up to date from the change feed matches a fresh fetch.
pub trait RecordFilter<R>: Send + Sync {
    fn matches(&self, record: &R) -> bool;

    fn order(&self, _a: &R, _b: &R) -> Ordering {
        Ordering::Equal
    }
}

/// Every record of a collection, in store order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRecords;

impl<R> RecordFilter<R> for AllRecords {
    fn matches(&self, _record: &R) -> bool {
        true
    }
}

/// A window into a sorted listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Page { offset: 0, limit }
    }

    pub fn slice<R>(&self, records: Vec<R>) -> Vec<R> {
        records.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

/// Durable storage for tasks, volunteers and completions with a change feed.
///
/// Implementations are shared between the engines and any number of live views,
/// so all methods take `&self`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Gets a record by id. Returns `None` if it does not exist.
    async fn get<R: Record>(&self, id: &R::Id) -> Result<Option<R>>;

    /// Lists the records matching `filter`, in the filter's order.
    async fn list<R: Record>(&self, filter: &dyn RecordFilter<R>, page: Option<Page>) -> Result<Vec<R>>;

    /// Inserts a new record. Fails if the id is already taken.
    async fn create<R: Record>(&self, record: R) -> Result<R>;

    /// Replaces an existing record. Fails with `NotFound` if it is absent.
    async fn update<R: Record>(&self, record: R) -> Result<R>;

    /// Removes a record. Fails with `NotFound` if it is absent.
    async fn delete<R: Record>(&self, id: &R::Id) -> Result<()>;

    /// Subscribes to the collection's change feed. Dropping the subscription unsubscribes.
    fn subscribe<R: Record>(&self) -> Subscription<R>;

    /// Gets a record by id, failing with `NotFound` if it does not exist.
    async fn fetch<R: Record>(&self, id: &R::Id) -> Result<R> {
        self.get::<R>(id)
            .await?
            .ok_or_else(|| BoardError::not_found(R::COLLECTION, id))
    }
}

/// A live handle on one collection's change feed.
#[derive(Debug)]
pub struct Subscription<R> {
    receiver: broadcast::Receiver<Change<R>>,
}

impl<R: Clone> Subscription<R> {
    pub fn new(receiver: broadcast::Receiver<Change<R>>) -> Self {
        Subscription { receiver }
    }

    /// Waits for the next change.
    ///
    /// `Lagged` means events were dropped and the holder must refresh from scratch.
    pub async fn recv(&mut self) -> std::result::Result<Change<R>, RecvError> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<Change<R>, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_slices_window() {
        let page = Page { offset: 1, limit: 2 };
        assert_eq!(page.slice(vec![1, 2, 3, 4]), vec![2, 3]);
        assert_eq!(Page::first(10).slice(vec![1]), vec![1]);
    }

    #[test]
    fn collection_labels() {
        assert_eq!(Collection::Volunteers.to_string(), "volunteers");
        assert_eq!(<Completion as Record>::COLLECTION, Collection::Completions);
    }
}
