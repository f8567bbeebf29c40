//! Record store wrapper that fails chosen writes on demand.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Collection, LocalStore, Page, Record, RecordFilter, RecordStore, Subscription};
use crate::error::{BoardError, Result};
use crate::fields::VolunteerId;
use crate::task::Task;
use crate::volunteer::{Completion, Volunteer};

/// A write that should fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Updating this volunteer's record fails.
    UpdateVolunteer(VolunteerId),
    /// Creating a completion for this volunteer fails.
    CreateCompletion(VolunteerId),
    /// Every task update fails.
    UpdateTask,
    /// Every completion delete fails.
    DeleteCompletion,
}

#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: LocalStore,
    faults: Mutex<HashSet<Fault>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().unwrap().insert(fault);
    }

    pub fn clear(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn trip(&self, fault: Fault) -> Result<()> {
        if self.faults.lock().unwrap().contains(&fault) {
            return Err(BoardError::storage(format!("injected failure: {fault:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn get<R: Record>(&self, id: &R::Id) -> Result<Option<R>> {
        self.inner.get::<R>(id).await
    }

    async fn list<R: Record>(&self, filter: &dyn RecordFilter<R>, page: Option<Page>) -> Result<Vec<R>> {
        self.inner.list(filter, page).await
    }

    async fn create<R: Record>(&self, record: R) -> Result<R> {
        if let Some(c) = (&record as &dyn Any).downcast_ref::<Completion>() {
            self.trip(Fault::CreateCompletion(c.volunteer.clone()))?;
        }
        self.inner.create(record).await
    }

    async fn update<R: Record>(&self, record: R) -> Result<R> {
        if let Some(v) = (&record as &dyn Any).downcast_ref::<Volunteer>() {
            self.trip(Fault::UpdateVolunteer(v.id.clone()))?;
        }
        if (&record as &dyn Any).is::<Task>() {
            self.trip(Fault::UpdateTask)?;
        }
        self.inner.update(record).await
    }

    async fn delete<R: Record>(&self, id: &R::Id) -> Result<()> {
        if R::COLLECTION == Collection::Completions {
            self.trip(Fault::DeleteCompletion)?;
        }
        self.inner.delete::<R>(id).await
    }

    fn subscribe<R: Record>(&self) -> Subscription<R> {
        self.inner.subscribe()
    }
}
