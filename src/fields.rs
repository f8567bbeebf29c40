//! Enumerations and field types for the volunteer board.
//!
//! This module defines the structured values used to categorise tasks (status, zone),
//! the sort and view selectors used by listings, and the opaque record identifiers.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
///
/// `Completed` is terminal. Archival is a separate flag on the task, not a status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[serde(alias = "Open")]
    Open,
    #[serde(alias = "InProgress", alias = "in-progress")]
    InProgress,
    #[serde(alias = "Completed", alias = "done")]
    Completed,
}

impl Status {
    /// Statuses shown on the public board and volunteer dashboard.
    pub const ACTIVE: [Status; 2] = [Status::Open, Status::InProgress];

    pub const fn is_terminal(self) -> bool {
        matches!(self, Status::Completed)
    }

    /// Lowercase label matching the stored field value.
    pub const fn as_label(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Area of the makerspace a task belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Zone {
    Woodshop,
    Metalshop,
    Electronics,
    Textiles,
    #[serde(alias = "3d-printing")]
    Printing,
    Laser,
    Kitchen,
    Grounds,
    FrontDesk,
    General,
}

/// Sort keys for task listings.
///
/// Every key falls back to the task number so the resulting order is total.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Number,
    Zone,
    Minutes,
    Updated,
}

/// Which live view a `watch` session reconciles.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ViewKind {
    /// Public display: everything open or in progress.
    Board,
    /// Per-volunteer: claimable tasks plus the viewer's own.
    Dashboard,
    /// Staff console: every status, archived excluded.
    Admin,
    /// Volunteers ranked by credited time.
    Leaderboard,
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

record_id!(
    /// Opaque task identifier.
    TaskId
);
record_id!(
    /// Opaque volunteer identifier.
    VolunteerId
);
record_id!(
    /// Opaque completion record identifier.
    CompletionId
);
