//! Volunteer and completion records.

use serde::{Deserialize, Serialize};

use crate::fields::{CompletionId, TaskId, VolunteerId};

/// A registered member who claims tasks and receives time credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: VolunteerId,
    /// Login reference from the identity provider.
    pub identity: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Cached sum of this volunteer's completion minutes, modulo admin resets.
    #[serde(default)]
    pub total_minutes: u64,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
}

/// One volunteer's credited time against one task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: CompletionId,
    pub task: TaskId,
    pub volunteer: VolunteerId,
    pub actual_minutes: u32,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at_utc: i64,
}
