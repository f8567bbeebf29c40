//! Task lifecycle: creation, claim/unclaim, edits and archival.
//!
//! State machine: `open ⇄ in_progress → completed`. Completion itself lives in
//! [`crate::crediting`]; this engine only refuses to move a task out of `completed`.
//! Archival is an orthogonal flag. Every listing goes through [`TaskFilter`], which
//! excludes archived tasks regardless of status.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{BoardError, Result};
use crate::fields::*;
use crate::notify::{Announcement, AnnouncementKind, Dispatcher};
use crate::store::{AllRecords, Collection, Page, RecordFilter, RecordStore};
use crate::task::{Task, TaskDraft, TaskPatch};
use crate::volunteer::Volunteer;

/// Which tasks a listing or live view holds, and in what order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Allowed statuses; empty means any.
    pub statuses: BTreeSet<Status>,
    pub zone: Option<Zone>,
    /// Only tasks assigned to this volunteer.
    pub assignee: Option<VolunteerId>,
    pub sort: SortKey,
}

impl TaskFilter {
    /// Everything open or in progress, as on the public display.
    pub fn board() -> Self {
        TaskFilter {
            statuses: Status::ACTIVE.into_iter().collect(),
            ..TaskFilter::default()
        }
    }

    /// Tasks anyone may claim.
    pub fn available() -> Self {
        TaskFilter {
            statuses: BTreeSet::from([Status::Open]),
            ..TaskFilter::default()
        }
    }

    /// Tasks a volunteer is currently working on.
    pub fn claimed_by(volunteer: VolunteerId) -> Self {
        TaskFilter {
            statuses: BTreeSet::from([Status::InProgress]),
            assignee: Some(volunteer),
            ..TaskFilter::default()
        }
    }

    /// Every status, for the staff console.
    pub fn admin() -> Self {
        TaskFilter::default()
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_zone(mut self, zone: Option<Zone>) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }
}

impl RecordFilter<Task> for TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        task.is_listed()
            && (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && self.zone.map_or(true, |z| task.zone == z)
            && self.assignee.as_ref().map_or(true, |v| task.is_assigned_to(v))
    }

    fn order(&self, a: &Task, b: &Task) -> Ordering {
        let primary = match self.sort {
            SortKey::Number => Ordering::Equal,
            SortKey::Zone => a.zone.cmp(&b.zone),
            SortKey::Minutes => a.estimated_minutes.cmp(&b.estimated_minutes),
            SortKey::Updated => b.updated_at_utc.cmp(&a.updated_at_utc),
        };
        primary
            .then(a.task_number.cmp(&b.task_number))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Validates and applies task transitions against a record store.
pub struct TaskEngine<S> {
    store: Arc<S>,
    dispatcher: Dispatcher,
}

impl<S: RecordStore> TaskEngine<S> {
    pub fn new(store: Arc<S>, dispatcher: Dispatcher) -> Self {
        TaskEngine { store, dispatcher }
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.store.fetch::<Task>(id).await
    }

    /// Resolve a task from `#N`/`N`, an id, or an exact title.
    ///
    /// Numbers and ids also find archived tasks; titles only match listed ones.
    pub async fn find_task(&self, identifier: &str) -> Result<Task> {
        let identifier = identifier.trim();
        if let Ok(number) = identifier.trim_start_matches('#').parse::<u64>() {
            let all = self.store.list::<Task>(&AllRecords, None).await?;
            return all
                .into_iter()
                .find(|t| t.task_number == number)
                .ok_or_else(|| BoardError::not_found(Collection::Tasks, format!("#{number}")));
        }
        if let Some(task) = self.store.get::<Task>(&TaskId::from(identifier)).await? {
            return Ok(task);
        }

        let wanted = identifier.to_lowercase();
        let mut matches = self.list_tasks(&TaskFilter::admin(), None).await?;
        matches.retain(|t| t.title.to_lowercase() == wanted);
        match matches.len() {
            0 => Err(BoardError::not_found(Collection::Tasks, identifier)),
            1 => Ok(matches.remove(0)),
            _ => {
                let candidates = matches
                    .iter()
                    .map(|t| format!("#{} ({})", t.task_number, t.status))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(BoardError::validation(format!(
                    "several tasks are titled '{identifier}': {candidates}; use the task number instead"
                )))
            }
        }
    }

    /// List tasks through the archived-exclusion read boundary.
    pub async fn list_tasks(&self, filter: &TaskFilter, page: Option<Page>) -> Result<Vec<Task>> {
        self.store.list::<Task>(filter, page).await
    }

    /// Next human-facing task number: highest existing (archived included) plus one.
    ///
    /// Two concurrent creators can both read the same maximum; see DESIGN.md.
    async fn next_task_number(&self) -> Result<u64> {
        let all = self.store.list::<Task>(&AllRecords, None).await?;
        Ok(all.iter().map(|t| t.task_number).max().unwrap_or(0) + 1)
    }

    async fn ensure_volunteer(&self, id: &VolunteerId) -> Result<()> {
        self.store.fetch::<Volunteer>(id).await.map(|_| ())
    }

    pub async fn create_task(
        &self,
        draft: TaskDraft,
        creator: &VolunteerId,
        assignee: Option<VolunteerId>,
    ) -> Result<Task> {
        draft.validate()?;
        if let Some(v) = &assignee {
            self.ensure_volunteer(v).await?;
        }
        let now = Utc::now().timestamp();
        let task = Task {
            id: TaskId::generate(),
            task_number: self.next_task_number().await?,
            title: draft.title.trim().to_string(),
            description: draft.description.filter(|d| !d.trim().is_empty()),
            zone: draft.zone,
            estimated_minutes: draft.estimated_minutes,
            status: if assignee.is_some() { Status::InProgress } else { Status::Open },
            assigned_to: assignee.into_iter().collect(),
            archived: false,
            created_by: creator.clone(),
            image: draft.image,
            created_at_utc: now,
            updated_at_utc: now,
        };
        let task = self.store.create(task).await?;
        info!(task_number = task.task_number, status = %task.status, creator = %creator, "task created");

        let contributors = task.assigned_to.iter().cloned().collect();
        self.dispatcher
            .dispatch(Announcement::new(AnnouncementKind::Created, &task, contributors))
            .await;
        Ok(task)
    }

    /// Assign an open task to one volunteer and move it to `in_progress`.
    ///
    /// Not idempotent: a second claim fails with `InvalidTransition` even for the same volunteer.
    pub async fn claim(&self, task_id: &TaskId, volunteer: &VolunteerId) -> Result<Task> {
        let mut task = self.get_task(task_id).await?;
        if task.status != Status::Open {
            return Err(invalid(&task, "claim"));
        }
        self.ensure_volunteer(volunteer).await?;

        task.assigned_to = BTreeSet::from([volunteer.clone()]);
        task.status = Status::InProgress;
        task.touch();
        let task = self.store.update(task).await?;
        info!(task_number = task.task_number, volunteer = %volunteer, "task claimed");

        self.dispatcher
            .dispatch(Announcement::new(AnnouncementKind::Claimed, &task, vec![volunteer.clone()]))
            .await;
        Ok(task)
    }

    /// Release an in-progress task back to `open`.
    pub async fn unclaim(&self, task_id: &TaskId) -> Result<Task> {
        let mut task = self.get_task(task_id).await?;
        if task.status != Status::InProgress {
            return Err(invalid(&task, "unclaim"));
        }
        task.assigned_to.clear();
        task.status = Status::Open;
        task.touch();
        let task = self.store.update(task).await?;
        info!(task_number = task.task_number, "task unclaimed");
        Ok(task)
    }

    /// Free-form edit.
    ///
    /// Assigning an unassigned open task promotes it to `in_progress` unless the patch
    /// sets a status itself. Removing assignees never demotes: such an edit must say
    /// `status = open` explicitly, or it is rejected.
    pub async fn edit_task(&self, task_id: &TaskId, patch: TaskPatch) -> Result<Task> {
        let mut task = self.get_task(task_id).await?;
        if task.status.is_terminal() {
            if patch.status.is_some_and(|s| s != Status::Completed) {
                return Err(invalid(&task, "reopen"));
            }
            if patch.assigned_to.is_some() {
                return Err(invalid(&task, "reassign"));
            }
        } else if patch.status == Some(Status::Completed) {
            return Err(BoardError::validation(format!(
                "task #{} can only be completed through completion, which credits contributors",
                task.task_number
            )));
        }

        patch.apply_fields(&mut task)?;

        if let Some(assignees) = &patch.assigned_to {
            for v in assignees {
                self.ensure_volunteer(v).await?;
            }
            let was_unassigned = task.assigned_to.is_empty();
            task.assigned_to = assignees.clone();
            if patch.status.is_none()
                && was_unassigned
                && !task.assigned_to.is_empty()
                && task.status == Status::Open
            {
                task.status = Status::InProgress;
            }
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        task.check_assignment()?;

        task.touch();
        let task = self.store.update(task).await?;
        info!(task_number = task.task_number, status = %task.status, "task edited");
        Ok(task)
    }

    /// Hide a task from every listing. Archiving an archived task changes nothing.
    pub async fn archive_task(&self, task_id: &TaskId) -> Result<Task> {
        self.set_archived(task_id, true).await
    }

    pub async fn unarchive_task(&self, task_id: &TaskId) -> Result<Task> {
        self.set_archived(task_id, false).await
    }

    async fn set_archived(&self, task_id: &TaskId, archived: bool) -> Result<Task> {
        let mut task = self.get_task(task_id).await?;
        if task.archived == archived {
            return Ok(task);
        }
        task.archived = archived;
        task.touch();
        let task = self.store.update(task).await?;
        info!(task_number = task.task_number, archived, "task archive flag changed");
        Ok(task)
    }
}

pub(crate) fn invalid(task: &Task, action: &'static str) -> BoardError {
    BoardError::InvalidTransition {
        task_number: task.task_number,
        status: task.status,
        action,
    }
}
