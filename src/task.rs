//! Task data structure and related functionality.
//!
//! This module defines the `Task` record along with the field sets used to create
//! (`TaskDraft`) and edit (`TaskPatch`) it, and the status/assignment invariant.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BoardError, Result};
use crate::fields::*;

/// Title prefix older data files used to mark a task as archived.
pub const LEGACY_ARCHIVE_MARKER: &str = "[ARCHIVED] ";

/// A unit of makerspace work moving from open to completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_number: u64,
    pub title: String,
    pub description: Option<String>,
    pub zone: Zone,
    pub estimated_minutes: u32,
    pub status: Status,
    #[serde(default, deserialize_with = "one_or_many")]
    pub assigned_to: BTreeSet<VolunteerId>,
    #[serde(default)]
    pub archived: bool,
    pub created_by: VolunteerId,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
}

impl Task {
    /// Whether the task may appear in any listing, count or live view.
    pub fn is_listed(&self) -> bool {
        !self.archived
    }

    pub fn is_assigned_to(&self, volunteer: &VolunteerId) -> bool {
        self.assigned_to.contains(volunteer)
    }

    /// Check the status/assignment invariant for non-terminal tasks.
    ///
    /// Completed tasks keep whatever assignment they had as a historical record.
    pub fn check_assignment(&self) -> Result<()> {
        match self.status {
            Status::InProgress if self.assigned_to.is_empty() => Err(BoardError::validation(format!(
                "task #{} cannot be in_progress without an assignee",
                self.task_number
            ))),
            Status::Open if !self.assigned_to.is_empty() => Err(BoardError::validation(format!(
                "task #{} cannot be open while assigned",
                self.task_number
            ))),
            _ => Ok(()),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at_utc = Utc::now().timestamp();
    }
}

/// Fields supplied when creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub zone: Zone,
    pub estimated_minutes: u32,
    pub image: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, zone: Zone, estimated_minutes: u32) -> Self {
        TaskDraft {
            title: title.into(),
            description: None,
            zone,
            estimated_minutes,
            image: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_minutes(self.estimated_minutes)
    }
}

/// A free-form edit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub zone: Option<Zone>,
    pub estimated_minutes: Option<u32>,
    pub image: Option<Option<String>>,
    pub assigned_to: Option<BTreeSet<VolunteerId>>,
    /// Explicit override; wins over the assignment-implies-claim promotion.
    pub status: Option<Status>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }

    /// Apply the plain field updates. Status and assignment are left to the lifecycle engine.
    pub fn apply_fields(&self, task: &mut Task) -> Result<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
            task.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            task.description = description.clone().filter(|d| !d.trim().is_empty());
        }
        if let Some(zone) = self.zone {
            task.zone = zone;
        }
        if let Some(minutes) = self.estimated_minutes {
            validate_minutes(minutes)?;
            task.estimated_minutes = minutes;
        }
        if let Some(image) = &self.image {
            task.image = image.clone();
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(BoardError::validation("title cannot be empty"));
    }
    Ok(())
}

fn validate_minutes(minutes: u32) -> Result<()> {
    if minutes == 0 {
        return Err(BoardError::validation("estimated minutes must be positive"));
    }
    Ok(())
}

/// Accept `null`, a single id, or a list of ids for `assigned_to`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<VolunteerId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(VolunteerId),
        Many(Vec<VolunteerId>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => BTreeSet::new(),
        Some(OneOrMany::One(id)) if id.as_str().is_empty() => BTreeSet::new(),
        Some(OneOrMany::One(id)) => BTreeSet::from([id]),
        Some(OneOrMany::Many(ids)) => ids.into_iter().collect(),
    })
}
