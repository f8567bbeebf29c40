//! Best-effort announcements to the makerspace chat.
//!
//! The engines hand an [`Announcement`] to a [`Dispatcher`] only after the
//! authoritative write has succeeded. Delivery failures and timeouts are logged and
//! dropped; they never reach the caller and never undo a claim or a completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BoardError, Result};
use crate::fields::VolunteerId;
use crate::task::Task;

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementKind {
    Created,
    Claimed,
    Completed,
}

/// What happened to a task, and who did it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    pub kind: AnnouncementKind,
    pub task: Task,
    pub contributors: Vec<VolunteerId>,
}

impl Announcement {
    pub fn new(kind: AnnouncementKind, task: &Task, contributors: Vec<VolunteerId>) -> Self {
        Announcement {
            kind,
            task: task.clone(),
            contributors,
        }
    }
}

/// Delivery channel for announcements.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> Result<()>;
}

/// Writes announcements to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        info!(
            kind = ?announcement.kind,
            task_number = announcement.task.task_number,
            title = %announcement.task.title,
            contributors = announcement.contributors.len(),
            "announcement"
        );
        Ok(())
    }
}

/// Posts announcements as JSON to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BoardError::notification(format!("building webhook client: {e}")))?;
        Ok(WebhookNotifier {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        self.client
            .post(&self.url)
            .json(announcement)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| BoardError::notification(e.to_string()))?;
        Ok(())
    }
}

/// Bounds and swallows notifier calls on behalf of the engines.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new(Arc::new(LogNotifier), DEFAULT_NOTIFY_TIMEOUT)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Dispatcher { notifier, timeout }
    }

    /// Deliver an announcement, logging and discarding any failure.
    ///
    /// The call is awaited, bounded by the timeout, rather than spawned: a `board`
    /// process exits as soon as its command returns, which would cut a detached
    /// delivery short. A slow webhook therefore delays the caller by at most the
    /// timeout, and only after the write has been saved.
    pub async fn dispatch(&self, announcement: Announcement) {
        let task_number = announcement.task.task_number;
        let outcome = match tokio::time::timeout(self.timeout, self.notifier.announce(&announcement)).await {
            Ok(result) => result,
            Err(_) => Err(BoardError::notification(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };
        match outcome {
            Ok(()) => debug!(task_number, kind = ?announcement.kind, "announcement delivered"),
            Err(e) => warn!(task_number, kind = ?announcement.kind, error = %e, "announcement dropped"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::fields::{Status, TaskId, Zone};
    use std::collections::BTreeSet;

    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn announce(&self, _announcement: &Announcement) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn task() -> Task {
        Task {
            id: TaskId::from("t1"),
            task_number: 1,
            title: "Empty the dust collector".into(),
            description: None,
            zone: Zone::Woodshop,
            estimated_minutes: 20,
            status: Status::Open,
            assigned_to: BTreeSet::new(),
            archived: false,
            created_by: VolunteerId::from("staff"),
            image: None,
            created_at_utc: 0,
            updated_at_utc: 0,
        }
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let dispatcher = Dispatcher::new(notifier.clone(), DEFAULT_NOTIFY_TIMEOUT);
        dispatcher
            .dispatch(Announcement::new(AnnouncementKind::Created, &task(), vec![]))
            .await;
        assert_eq!(notifier.kinds(), vec![AnnouncementKind::Created]);
    }

    #[tokio::test]
    async fn stalled_notifier_is_cut_off() {
        let dispatcher = Dispatcher::new(Arc::new(StalledNotifier), Duration::from_millis(20));
        let started = std::time::Instant::now();
        dispatcher
            .dispatch(Announcement::new(AnnouncementKind::Claimed, &task(), vec![]))
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn announcement_serialises_kind_in_snake_case() {
        let a = Announcement::new(AnnouncementKind::Completed, &task(), vec![VolunteerId::from("v1")]);
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["contributors"][0], "v1");
    }
}
