//! Error types for the board core.

use crate::crediting::PartialCompletion;
use crate::fields::Status;
use crate::store::Collection;

/// The result type used throughout the board core.
pub type Result<T> = std::result::Result<T, BoardError>;

/// Errors that can occur in lifecycle, crediting and store operations.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// A referenced record does not exist.
    #[error("{collection} record not found: {id}")]
    NotFound {
        /// The collection that was searched.
        collection: Collection,
        /// The id that was not found.
        id: String,
    },

    /// The task's current status forbids the requested operation.
    ///
    /// Usually another actor changed the task first; callers should re-fetch it.
    #[error("cannot {action} task #{task_number} while it is {status}")]
    InvalidTransition {
        /// Human-facing number of the task.
        task_number: u64,
        /// Status observed when the operation was attempted.
        status: Status,
        /// The rejected operation.
        action: &'static str,
    },

    /// Some contributors were credited before a later write failed.
    ///
    /// Never retry the whole completion: the report names who still needs credit.
    #[error("{report}")]
    PartialCompletionFailure {
        /// Who was and was not credited.
        report: PartialCompletion,
        /// The write that failed.
        #[source]
        source: Box<BoardError>,
    },

    /// Input rejected before any write.
    #[error("invalid input: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The notification dispatcher failed or timed out.
    #[error("notification failed: {message}")]
    Notification {
        /// Description of the failure.
        message: String,
    },

    /// The configuration file is unreadable or malformed.
    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },
}

impl BoardError {
    pub fn not_found(collection: Collection, id: impl ToString) -> Self {
        Self::NotFound {
            collection,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>, source: Option<toml::de::Error>) -> Self {
        Self::Config {
            message: message.into(),
            source,
        }
    }

    /// True when the caller should refresh its view of the task and try again by hand.
    pub const fn is_stale_view(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
