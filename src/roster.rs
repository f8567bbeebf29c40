//! Volunteers: registration, lookup, standings and the admin ledger tools.
//!
//! `total_minutes` on a volunteer is a cache of their completion ledger. The two
//! can drift: an admin reset zeroes the cache without touching history, a purge
//! removes history without touching the cache, and concurrent completions can lose
//! an increment. [`RosterEngine::reconcile`] reports the drift; nothing here fixes
//! it silently.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{BoardError, Result};
use crate::fields::{TaskId, VolunteerId};
use crate::store::{AllRecords, Collection, Page, RecordFilter, RecordStore};
use crate::task::Task;
use crate::volunteer::{Completion, Volunteer};

/// Orderings for volunteer listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VolunteerFilter {
    /// Alphabetical by name.
    #[default]
    Roster,
    /// Most minutes first, then by name.
    Leaderboard,
}

impl RecordFilter<Volunteer> for VolunteerFilter {
    fn matches(&self, _volunteer: &Volunteer) -> bool {
        true
    }

    fn order(&self, a: &Volunteer, b: &Volunteer) -> Ordering {
        let by_name = || a.name.to_lowercase().cmp(&b.name.to_lowercase());
        match self {
            VolunteerFilter::Roster => by_name(),
            VolunteerFilter::Leaderboard => b.total_minutes.cmp(&a.total_minutes).then_with(by_name),
        }
        .then_with(|| a.id.cmp(&b.id))
    }
}

/// Completion records for one task and/or one volunteer, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionFilter {
    pub task: Option<TaskId>,
    pub volunteer: Option<VolunteerId>,
}

impl RecordFilter<Completion> for CompletionFilter {
    fn matches(&self, c: &Completion) -> bool {
        self.task.as_ref().map_or(true, |t| &c.task == t)
            && self.volunteer.as_ref().map_or(true, |v| &c.volunteer == v)
    }

    fn order(&self, a: &Completion, b: &Completion) -> Ordering {
        b.created_at_utc
            .cmp(&a.created_at_utc)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Cached total against the ledger for one volunteer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub volunteer: Volunteer,
    pub ledger_minutes: u64,
    pub completions: usize,
}

impl Reconciliation {
    /// Cached minus ledger. Negative after a lost increment, positive after a purge.
    pub fn drift(&self) -> i128 {
        i128::from(self.volunteer.total_minutes) - i128::from(self.ledger_minutes)
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

pub struct RosterEngine<S> {
    store: Arc<S>,
}

impl<S: RecordStore> RosterEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        RosterEngine { store }
    }

    /// Register a volunteer, or return the one already holding `identity`.
    pub async fn register(&self, identity: &str, name: &str, avatar: Option<String>) -> Result<Volunteer> {
        let identity = identity.trim();
        let name = name.trim();
        if identity.is_empty() {
            return Err(BoardError::validation("identity reference cannot be empty"));
        }
        if name.is_empty() {
            return Err(BoardError::validation("volunteer name cannot be empty"));
        }

        let all = self.store.list::<Volunteer>(&AllRecords, None).await?;
        if let Some(existing) = all.into_iter().find(|v| v.identity == identity) {
            return Ok(existing);
        }

        let now = Utc::now().timestamp();
        let volunteer = self
            .store
            .create(Volunteer {
                id: VolunteerId::generate(),
                identity: identity.to_string(),
                name: name.to_string(),
                avatar,
                total_minutes: 0,
                created_at_utc: now,
                updated_at_utc: now,
            })
            .await?;
        info!(volunteer = %volunteer.id, name = %volunteer.name, "volunteer registered");
        Ok(volunteer)
    }

    /// Resolve a volunteer by id, identity reference, or display name.
    pub async fn find_volunteer(&self, identifier: &str) -> Result<Volunteer> {
        let identifier = identifier.trim();
        if let Some(v) = self.store.get::<Volunteer>(&VolunteerId::from(identifier)).await? {
            return Ok(v);
        }
        let all = self.store.list::<Volunteer>(&VolunteerFilter::Roster, None).await?;
        if let Some(v) = all.iter().find(|v| v.identity == identifier) {
            return Ok(v.clone());
        }

        let wanted = identifier.to_lowercase();
        let mut named: Vec<Volunteer> = all.into_iter().filter(|v| v.name.to_lowercase() == wanted).collect();
        match named.len() {
            0 => Err(BoardError::not_found(Collection::Volunteers, identifier)),
            1 => Ok(named.remove(0)),
            n => Err(BoardError::validation(format!(
                "{n} volunteers are named '{identifier}'; use an id or identity instead"
            ))),
        }
    }

    pub async fn list_volunteers(&self) -> Result<Vec<Volunteer>> {
        self.store.list::<Volunteer>(&VolunteerFilter::Roster, None).await
    }

    pub async fn leaderboard(&self, limit: Option<usize>) -> Result<Vec<Volunteer>> {
        self.store
            .list::<Volunteer>(&VolunteerFilter::Leaderboard, limit.map(Page::first))
            .await
    }

    /// Zero a volunteer's cached total. Their completion history is kept.
    pub async fn reset_minutes(&self, id: &VolunteerId) -> Result<Volunteer> {
        let mut volunteer = self.store.fetch::<Volunteer>(id).await?;
        let previous = volunteer.total_minutes;
        volunteer.total_minutes = 0;
        volunteer.updated_at_utc = Utc::now().timestamp();
        let volunteer = self.store.update(volunteer).await?;
        info!(volunteer = %volunteer.id, previous, "volunteer minutes reset");
        Ok(volunteer)
    }

    pub async fn reconcile(&self, id: &VolunteerId) -> Result<Reconciliation> {
        let volunteer = self.store.fetch::<Volunteer>(id).await?;
        let ledger = self.history(None, Some(id)).await?;
        Ok(Reconciliation {
            ledger_minutes: ledger.iter().map(|c| u64::from(c.actual_minutes)).sum(),
            completions: ledger.len(),
            volunteer,
        })
    }

    /// Delete every completion record of a task. Volunteer totals are left alone.
    ///
    /// Returns the number of records removed. Stops at the first failed delete.
    pub async fn purge_completions(&self, task_id: &TaskId) -> Result<usize> {
        let task = self.store.fetch::<Task>(task_id).await?;
        let records = self.history(Some(task_id), None).await?;
        for record in &records {
            self.store.delete::<Completion>(&record.id).await?;
        }
        info!(task_number = task.task_number, removed = records.len(), "completions purged");
        Ok(records.len())
    }

    pub async fn history(&self, task: Option<&TaskId>, volunteer: Option<&VolunteerId>) -> Result<Vec<Completion>> {
        let filter = CompletionFilter {
            task: task.cloned(),
            volunteer: volunteer.cloned(),
        };
        self.store.list::<Completion>(&filter, None).await
    }
}
