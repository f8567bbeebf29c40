//! Completion crediting.
//!
//! Turns "these volunteers finished task X, M minutes each" into one [`Completion`]
//! per contributor, an increment of each contributor's `total_minutes`, and finally
//! the task's move to `completed`.
//!
//! ## Write ordering
//!
//! The store offers no transactions and no atomic increment, so the engine:
//!
//! 1. reads every contributor's balance before writing anything;
//! 2. credits contributors strictly one after another, in the order given;
//! 3. marks the task completed only after every credit landed.
//!
//! If any write fails the whole call stops and reports exactly who was credited
//! ([`BoardError::PartialCompletionFailure`]). Retrying the same call would credit
//! those volunteers twice; finish the job by completing again with only the
//! uncredited volunteers.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{BoardError, Result};
use crate::fields::{CompletionId, Status, TaskId, VolunteerId};
use crate::lifecycle::invalid;
use crate::notify::{Announcement, AnnouncementKind, Dispatcher};
use crate::store::RecordStore;
use crate::task::Task;
use crate::volunteer::{Completion, Volunteer};

/// Which contributors a failed completion did and did not credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCompletion {
    pub task: TaskId,
    pub task_number: u64,
    /// Contributors whose completion record and balance were both written.
    pub credited: Vec<VolunteerId>,
    /// Contributors who still need credit, in the original order.
    pub uncredited: Vec<VolunteerId>,
    /// A completion record written for an uncredited contributor that could not be removed.
    pub orphaned_completion: Option<CompletionId>,
}

impl fmt::Display for PartialCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |ids: &[VolunteerId]| {
            if ids.is_empty() {
                "none".to_string()
            } else {
                ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            }
        };
        write!(
            f,
            "task #{} was only partly completed: credited [{}]; not credited [{}]",
            self.task_number,
            list(&self.credited),
            list(&self.uncredited)
        )?;
        if let Some(orphan) = &self.orphaned_completion {
            write!(f, "; completion record {orphan} has no matching credit")?;
        }
        Ok(())
    }
}

/// Result of a fully successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub completions: Vec<Completion>,
    pub task: Task,
}

struct CreditFailure {
    source: BoardError,
    orphan: Option<CompletionId>,
}

/// Credits contributors and completes tasks against a record store.
pub struct CreditEngine<S> {
    store: Arc<S>,
    dispatcher: Dispatcher,
}

impl<S: RecordStore> CreditEngine<S> {
    pub fn new(store: Arc<S>, dispatcher: Dispatcher) -> Self {
        CreditEngine { store, dispatcher }
    }

    /// Complete `task_id`, crediting every volunteer with the full `minutes`.
    ///
    /// Each contributor receives `minutes`, not a share of it.
    pub async fn complete(
        &self,
        task_id: &TaskId,
        volunteers: &[VolunteerId],
        minutes: u32,
        note: Option<String>,
    ) -> Result<CompletionOutcome> {
        validate_contributors(volunteers, minutes)?;

        let task = self.store.fetch::<Task>(task_id).await?;
        if task.status.is_terminal() {
            return Err(invalid(&task, "complete"));
        }

        let mut contributors = Vec::with_capacity(volunteers.len());
        for id in volunteers {
            contributors.push(self.store.fetch::<Volunteer>(id).await?);
        }

        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let mut completions = Vec::with_capacity(contributors.len());
        for (done, volunteer) in contributors.into_iter().enumerate() {
            match self.credit(&task, volunteer, minutes, note.as_deref()).await {
                Ok(completion) => completions.push(completion),
                Err(failure) => {
                    return Err(partial(&task, volunteers, done, failure.orphan, failure.source));
                }
            }
        }

        let task = match self.mark_completed(task_id).await {
            Ok(task) => task,
            Err(e) => return Err(partial(&task, volunteers, volunteers.len(), None, e)),
        };
        info!(
            task_number = task.task_number,
            contributors = volunteers.len(),
            minutes,
            "task completed"
        );

        self.dispatcher
            .dispatch(Announcement::new(AnnouncementKind::Completed, &task, volunteers.to_vec()))
            .await;
        Ok(CompletionOutcome { completions, task })
    }

    /// Write one contributor's completion record, then their new balance.
    ///
    /// `volunteer` is the balance read before any write of this completion began.
    async fn credit(
        &self,
        task: &Task,
        mut volunteer: Volunteer,
        minutes: u32,
        note: Option<&str>,
    ) -> std::result::Result<Completion, CreditFailure> {
        let now = Utc::now().timestamp();
        let completion = Completion {
            id: CompletionId::generate(),
            task: task.id.clone(),
            volunteer: volunteer.id.clone(),
            actual_minutes: minutes,
            note: note.map(str::to_string),
            created_at_utc: now,
        };
        let completion = self
            .store
            .create(completion)
            .await
            .map_err(|source| CreditFailure { source, orphan: None })?;

        let previous = volunteer.total_minutes;
        volunteer.total_minutes = previous.saturating_add(u64::from(minutes));
        volunteer.updated_at_utc = now;
        let volunteer_id = volunteer.id.clone();
        if let Err(source) = self.store.update(volunteer).await {
            // Without the balance update this record would be credit nobody received.
            let orphan = match self.store.delete::<Completion>(&completion.id).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(completion = %completion.id, error = %e, "could not remove uncredited completion record");
                    Some(completion.id.clone())
                }
            };
            return Err(CreditFailure { source, orphan });
        }

        info!(
            task_number = task.task_number,
            volunteer = %volunteer_id,
            previous,
            minutes,
            "volunteer credited"
        );
        Ok(completion)
    }

    /// Re-read the task and move it to `completed`.
    async fn mark_completed(&self, task_id: &TaskId) -> Result<Task> {
        let mut latest = self.store.fetch::<Task>(task_id).await?;
        if latest.status.is_terminal() {
            return Err(invalid(&latest, "complete"));
        }
        latest.status = Status::Completed;
        latest.touch();
        self.store.update(latest).await
    }
}

fn validate_contributors(volunteers: &[VolunteerId], minutes: u32) -> Result<()> {
    if volunteers.is_empty() {
        return Err(BoardError::validation("at least one contributor is required"));
    }
    if minutes == 0 {
        return Err(BoardError::validation("minutes per volunteer must be positive"));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = volunteers.iter().find(|v| !seen.insert(*v)) {
        return Err(BoardError::validation(format!("volunteer {dup} is listed twice")));
    }
    Ok(())
}

fn partial(
    task: &Task,
    volunteers: &[VolunteerId],
    credited: usize,
    orphaned_completion: Option<CompletionId>,
    source: BoardError,
) -> BoardError {
    let report = PartialCompletion {
        task: task.id.clone(),
        task_number: task.task_number,
        credited: volunteers[..credited].to_vec(),
        uncredited: volunteers[credited..].to_vec(),
        orphaned_completion,
    };
    warn!(%report, error = %source, "completion aborted");
    BoardError::PartialCompletionFailure {
        report,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Zone;
    use crate::lifecycle::TaskEngine;
    use crate::notify::testing::RecordingNotifier;
    use crate::store::faulty::{Fault, FaultyStore};
    use crate::store::{AllRecords, LocalStore};
    use crate::task::TaskDraft;
    use crate::testing::{engines, engines_over, seed_volunteers, volunteer};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    async fn total<S: RecordStore>(store: &S, id: &str) -> u64 {
        store.fetch::<Volunteer>(&id.into()).await.unwrap().total_minutes
    }

    async fn completion_count<S: RecordStore>(store: &S) -> usize {
        store.list::<Completion>(&AllRecords, None).await.unwrap().len()
    }

    async fn new_task<S: RecordStore>(tasks: &TaskEngine<S>) -> Task {
        tasks
            .create_task(TaskDraft::new("Reorganise filament shelf", Zone::Printing, 60), &"staff".into(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn every_contributor_gets_the_full_minutes() {
        let (store, tasks, credits) = engines();
        seed_volunteers(&store, &["staff", "a", "b"]).await;
        let task = new_task(&tasks).await;
        tasks.claim(&task.id, &"a".into()).await.unwrap();

        let outcome = credits
            .complete(&task.id, &["a".into(), "b".into()], 45, Some("finished together".into()))
            .await
            .unwrap();

        assert_eq!(outcome.completions.len(), 2);
        assert!(outcome.completions.iter().all(|c| c.actual_minutes == 45));
        assert!(outcome.completions.iter().all(|c| c.note.as_deref() == Some("finished together")));
        assert_eq!(total(&*store, "a").await, 45);
        assert_eq!(total(&*store, "b").await, 45);
        assert_eq!(outcome.task.status, Status::Completed);
        // Assignment is kept as a historical record.
        assert_eq!(outcome.task.assigned_to, BTreeSet::from([VolunteerId::from("a")]));
    }

    #[tokio::test]
    async fn five_volunteers_at_sixty_minutes_is_three_hundred_total() {
        let (store, tasks, credits) = engines();
        let ids = ["v1", "v2", "v3", "v4", "v5"];
        seed_volunteers(&store, &["staff"]).await;
        seed_volunteers(&store, &ids).await;
        let task = new_task(&tasks).await;

        let contributors: Vec<VolunteerId> = ids.iter().map(|&v| v.into()).collect();
        credits.complete(&task.id, &contributors, 60, None).await.unwrap();

        let mut sum = 0;
        for id in ids {
            assert_eq!(total(&*store, id).await, 60);
            sum += total(&*store, id).await;
        }
        assert_eq!(sum, 300);
        assert_eq!(completion_count(&*store).await, 5);
    }

    #[tokio::test]
    async fn credit_adds_to_existing_balance() {
        let (store, tasks, credits) = engines();
        seed_volunteers(&store, &["staff"]).await;
        let mut veteran = volunteer("a", "Ada");
        veteran.total_minutes = 100;
        store.create(veteran).await.unwrap();
        let task = new_task(&tasks).await;

        credits.complete(&task.id, &["a".into()], 45, None).await.unwrap();
        assert_eq!(total(&*store, "a").await, 145);
    }

    #[tokio::test]
    async fn completed_task_cannot_be_completed_again() {
        let (store, tasks, credits) = engines();
        seed_volunteers(&store, &["staff", "a"]).await;
        let task = new_task(&tasks).await;
        credits.complete(&task.id, &["a".into()], 30, None).await.unwrap();

        let err = credits.complete(&task.id, &["a".into()], 30, None).await.unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition { action: "complete", status: Status::Completed, .. }));
        assert_eq!(total(&*store, "a").await, 30);
        assert_eq!(completion_count(&*store).await, 1);
    }

    #[tokio::test]
    async fn bad_input_is_rejected_before_any_write() {
        let (store, tasks, credits) = engines();
        seed_volunteers(&store, &["staff", "a"]).await;
        let task = new_task(&tasks).await;

        assert!(matches!(credits.complete(&task.id, &[], 30, None).await, Err(BoardError::Validation { .. })));
        assert!(matches!(
            credits.complete(&task.id, &["a".into()], 0, None).await,
            Err(BoardError::Validation { .. })
        ));
        assert!(matches!(
            credits.complete(&task.id, &["a".into(), "a".into()], 30, None).await,
            Err(BoardError::Validation { .. })
        ));
        assert!(matches!(
            credits.complete(&task.id, &["a".into(), "ghost".into()], 30, None).await,
            Err(BoardError::NotFound { .. })
        ));
        assert!(matches!(
            credits.complete(&"missing".into(), &["a".into()], 30, None).await,
            Err(BoardError::NotFound { .. })
        ));

        assert_eq!(total(&*store, "a").await, 0);
        assert_eq!(completion_count(&*store).await, 0);
        assert_eq!(tasks.get_task(&task.id).await.unwrap().status, Status::Open);
    }

    #[tokio::test]
    async fn failure_after_first_credit_reports_who_was_credited() {
        let store = Arc::new(FaultyStore::new());
        let (tasks, credits) = engines_over(store.clone());
        seed_volunteers(&store.inner, &["staff", "a", "b"]).await;
        let task = new_task(&tasks).await;
        tasks.claim(&task.id, &"a".into()).await.unwrap();
        store.inject(Fault::UpdateVolunteer("b".into()));

        let err = credits
            .complete(&task.id, &["a".into(), "b".into()], 45, None)
            .await
            .unwrap_err();
        let BoardError::PartialCompletionFailure { report, .. } = &err else {
            panic!("expected partial completion, got {err:?}");
        };
        assert_eq!(report.credited, vec![VolunteerId::from("a")]);
        assert_eq!(report.uncredited, vec![VolunteerId::from("b")]);
        assert_eq!(report.orphaned_completion, None);
        assert!(err.to_string().contains("credited [a]; not credited [b]"));

        assert_eq!(total(&*store, "a").await, 45);
        assert_eq!(total(&*store, "b").await, 0);
        assert_eq!(completion_count(&*store).await, 1);
        assert_eq!(tasks.get_task(&task.id).await.unwrap().status, Status::InProgress);

        // Manual recovery: complete again for the uncredited volunteer only.
        store.clear();
        let outcome = credits.complete(&task.id, &report.uncredited, 45, None).await.unwrap();
        assert_eq!(outcome.task.status, Status::Completed);
        assert_eq!(total(&*store, "a").await, 45);
        assert_eq!(total(&*store, "b").await, 45);
        assert_eq!(completion_count(&*store).await, 2);
    }

    #[tokio::test]
    async fn failed_compensation_reports_orphaned_record() {
        let store = Arc::new(FaultyStore::new());
        let (tasks, credits) = engines_over(store.clone());
        seed_volunteers(&store.inner, &["staff", "a"]).await;
        let task = new_task(&tasks).await;
        store.inject(Fault::UpdateVolunteer("a".into()));
        store.inject(Fault::DeleteCompletion);

        let err = credits.complete(&task.id, &["a".into()], 20, None).await.unwrap_err();
        let BoardError::PartialCompletionFailure { report, .. } = err else {
            panic!("expected partial completion");
        };
        assert!(report.credited.is_empty());
        let orphan = report.orphaned_completion.expect("orphan reported");
        assert!(store.get::<Completion>(&orphan).await.unwrap().is_some());
        assert_eq!(total(&*store, "a").await, 0);
    }

    #[tokio::test]
    async fn failed_first_record_credits_nobody() {
        let store = Arc::new(FaultyStore::new());
        let (tasks, credits) = engines_over(store.clone());
        seed_volunteers(&store.inner, &["staff", "a", "b"]).await;
        let task = new_task(&tasks).await;
        store.inject(Fault::CreateCompletion("a".into()));

        let err = credits
            .complete(&task.id, &["a".into(), "b".into()], 20, None)
            .await
            .unwrap_err();
        let BoardError::PartialCompletionFailure { report, source } = err else {
            panic!("expected partial completion");
        };
        assert!(report.credited.is_empty());
        assert_eq!(report.uncredited.len(), 2);
        assert!(matches!(*source, BoardError::Storage { .. }));
        assert_eq!(completion_count(&*store).await, 0);
    }

    #[tokio::test]
    async fn failed_status_write_after_all_credits_is_still_partial() {
        let store = Arc::new(FaultyStore::new());
        let (tasks, credits) = engines_over(store.clone());
        seed_volunteers(&store.inner, &["staff", "a", "b"]).await;
        let task = new_task(&tasks).await;
        store.inject(Fault::UpdateTask);

        let err = credits
            .complete(&task.id, &["a".into(), "b".into()], 15, None)
            .await
            .unwrap_err();
        let BoardError::PartialCompletionFailure { report, .. } = err else {
            panic!("expected partial completion");
        };
        assert_eq!(report.credited.len(), 2);
        assert!(report.uncredited.is_empty());
        assert_eq!(tasks.get_task(&task.id).await.unwrap().status, Status::Open);
    }

    #[tokio::test]
    async fn notifier_failure_does_not_undo_completion() {
        let store = Arc::new(LocalStore::in_memory());
        seed_volunteers(&store, &["staff", "a"]).await;
        let notifier = Arc::new(RecordingNotifier::failing());
        let dispatcher = Dispatcher::new(notifier.clone(), crate::notify::DEFAULT_NOTIFY_TIMEOUT);
        let tasks = TaskEngine::new(store.clone(), dispatcher.clone());
        let credits = CreditEngine::new(store.clone(), dispatcher);
        let task = new_task(&tasks).await;

        let outcome = credits.complete(&task.id, &["a".into()], 25, None).await.unwrap();
        assert_eq!(outcome.task.status, Status::Completed);
        assert_eq!(total(&*store, "a").await, 25);
        assert_eq!(notifier.kinds().last(), Some(&AnnouncementKind::Completed));
    }
}
