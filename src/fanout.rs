//! Realtime fan-out: keeping local lists in step with the store's change feed.
//!
//! A view fetches its lists once, then applies every [`Change`] it receives. The
//! same rules run for the public board, a volunteer's dashboard and the admin
//! console; the only thing that differs is the [`RecordFilter`] each list holds.
//!
//! | event    | held | matches | result                                    |
//! |----------|------|---------|-------------------------------------------|
//! | create / update | no  | no  | ignored                                    |
//! | create / update | no  | yes | inserted in order                          |
//! | create / update | yes | no  | removed                                    |
//! | create / update | yes | yes | replaced in place, or moved if order broke |
//! | delete   | any  | any     | removed if held                           |
//!
//! Because every filter defines a total order, a list maintained this way equals a
//! fresh `list` of the same filter once the feed is drained.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fields::VolunteerId;
use crate::lifecycle::TaskFilter;
use crate::store::{Change, ChangeAction, Record, RecordFilter, RecordStore};
use crate::task::Task;

/// What one change did to one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Inserted(usize),
    Replaced(usize),
    Moved { from: usize, to: usize },
    Removed(usize),
    Ignored,
}

/// An ordered local copy of the records matching a filter.
#[derive(Debug, Clone)]
pub struct LiveList<R, F> {
    filter: F,
    items: Vec<R>,
}

impl<R: Record, F: RecordFilter<R>> LiveList<R, F> {
    pub fn new(filter: F) -> Self {
        LiveList {
            filter,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[R] {
        &self.items
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the local copy with a full fetch.
    pub async fn refresh<S: RecordStore>(&mut self, store: &S) -> Result<()> {
        self.items = store.list::<R>(&self.filter, None).await?;
        Ok(())
    }

    /// Reconcile one change-feed event.
    ///
    /// A create for a record already held is handled as an update, so replaying
    /// events that a refresh already reflected is harmless.
    pub fn apply(&mut self, change: Change<R>) -> Delta {
        let Change { action, record } = change;
        let held = self.items.iter().position(|r| r.id() == record.id());

        let delta = if action == ChangeAction::Delete {
            match held {
                Some(at) => {
                    self.items.remove(at);
                    Delta::Removed(at)
                }
                None => Delta::Ignored,
            }
        } else {
            match (held, self.filter.matches(&record)) {
                (None, false) => Delta::Ignored,
                (None, true) => Delta::Inserted(self.insert(record)),
                (Some(at), false) => {
                    self.items.remove(at);
                    Delta::Removed(at)
                }
                (Some(at), true) if self.items[at] == record => Delta::Ignored,
                (Some(at), true) if self.fits_at(at, &record) => {
                    self.items[at] = record;
                    Delta::Replaced(at)
                }
                (Some(at), true) => {
                    self.items.remove(at);
                    Delta::Moved {
                        from: at,
                        to: self.insert(record),
                    }
                }
            }
        };
        if delta != Delta::Ignored {
            debug!(collection = %R::COLLECTION, ?action, ?delta, "live list updated");
        }
        delta
    }

    fn insert(&mut self, record: R) -> usize {
        let at = self
            .items
            .partition_point(|r| self.filter.order(r, &record).is_lt());
        self.items.insert(at, record);
        at
    }

    /// Whether `record` can sit at `at` without breaking the list's order.
    fn fits_at(&self, at: usize, record: &R) -> bool {
        let after_prev = at == 0 || self.filter.order(&self.items[at - 1], record).is_lt();
        let before_next = self
            .items
            .get(at + 1)
            .map_or(true, |next| self.filter.order(record, next).is_lt());
        after_prev && before_next
    }
}

/// A set of live lists fed from one collection.
#[async_trait]
pub trait View: Send {
    type Record: Record;

    /// Refetch every list from scratch.
    async fn refresh<S: RecordStore>(&mut self, store: &S) -> Result<()>;

    /// Apply one event. Returns whether anything visible changed.
    fn apply(&mut self, change: Change<Self::Record>) -> bool;
}

#[async_trait]
impl<R, F> View for LiveList<R, F>
where
    R: Record,
    F: RecordFilter<R> + 'static,
{
    type Record = R;

    async fn refresh<S: RecordStore>(&mut self, store: &S) -> Result<()> {
        LiveList::refresh(self, store).await
    }

    fn apply(&mut self, change: Change<R>) -> bool {
        LiveList::apply(self, change) != Delta::Ignored
    }
}

/// A volunteer's own view: tasks they can pick up and tasks they are working on.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub volunteer: VolunteerId,
    pub available: LiveList<Task, TaskFilter>,
    pub mine: LiveList<Task, TaskFilter>,
}

impl Dashboard {
    pub fn for_volunteer(volunteer: VolunteerId) -> Self {
        Dashboard {
            available: LiveList::new(TaskFilter::available()),
            mine: LiveList::new(TaskFilter::claimed_by(volunteer.clone())),
            volunteer,
        }
    }
}

#[async_trait]
impl View for Dashboard {
    type Record = Task;

    async fn refresh<S: RecordStore>(&mut self, store: &S) -> Result<()> {
        self.available.refresh(store).await?;
        self.mine.refresh(store).await
    }

    fn apply(&mut self, change: Change<Task>) -> bool {
        let available = self.available.apply(change.clone()) != Delta::Ignored;
        let mine = self.mine.apply(change) != Delta::Ignored;
        available || mine
    }
}

/// Keep `view` current until the store's feed closes.
///
/// Subscribes before the first fetch so no write falls between the two. A lagged
/// subscription is replaced and the view refetched; failed fetches are retried
/// every `retry_delay`. Feed trouble is logged, never returned. `on_change` runs
/// after the initial fetch and after every visible change.
pub async fn follow<S, V>(store: &S, view: &mut V, retry_delay: Duration, mut on_change: impl FnMut(&V) + Send)
where
    S: RecordStore,
    V: View,
{
    let mut subscription = store.subscribe::<V::Record>();
    resync(store, view, retry_delay).await;
    on_change(view);

    loop {
        match subscription.recv().await {
            Ok(change) => {
                if view.apply(change) {
                    on_change(view);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "change feed lagged, resubscribing");
                subscription = store.subscribe::<V::Record>();
                resync(store, view, retry_delay).await;
                on_change(view);
            }
            Err(RecvError::Closed) => {
                debug!("change feed closed");
                return;
            }
        }
    }
}

async fn resync<S: RecordStore, V: View>(store: &S, view: &mut V, retry_delay: Duration) {
    loop {
        match view.refresh(store).await {
            Ok(()) => return,
            Err(e) => {
                warn!(error = %e, retry_ms = retry_delay.as_millis() as u64, "view refresh failed");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::fields::{SortKey, Status, Zone};
    use crate::store::LocalStore;
    use crate::task::{TaskDraft, TaskPatch};
    use crate::testing::{engines, seed_volunteers};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn task(id: &str, number: u64, status: Status, minutes: u32) -> Task {
        Task {
            id: id.into(),
            task_number: number,
            title: format!("Task {number}"),
            description: None,
            zone: Zone::General,
            estimated_minutes: minutes,
            status,
            assigned_to: if status == Status::Open {
                BTreeSet::new()
            } else {
                BTreeSet::from(["a".into()])
            },
            archived: false,
            created_by: "staff".into(),
            image: None,
            created_at_utc: 0,
            updated_at_utc: 0,
        }
    }

    fn numbers(list: &[Task]) -> Vec<u64> {
        list.iter().map(|t| t.task_number).collect()
    }

    #[test]
    fn board_inserts_matching_creates_in_order() {
        let mut board = LiveList::new(TaskFilter::board());
        assert_eq!(board.apply(Change::created(task("c", 3, Status::Open, 10))), Delta::Inserted(0));
        assert_eq!(board.apply(Change::created(task("a", 1, Status::InProgress, 10))), Delta::Inserted(0));
        assert_eq!(board.apply(Change::created(task("b", 2, Status::Open, 10))), Delta::Inserted(1));
        assert_eq!(board.apply(Change::created(task("d", 4, Status::Completed, 10))), Delta::Ignored);
        assert_eq!(numbers(board.items()), vec![1, 2, 3]);
    }

    #[test]
    fn update_moves_records_in_and_out_of_the_filter() {
        let mut available = LiveList::new(TaskFilter::available());
        available.apply(Change::created(task("a", 1, Status::Open, 10)));
        available.apply(Change::created(task("b", 2, Status::Open, 10)));

        assert_eq!(available.apply(Change::updated(task("a", 1, Status::InProgress, 10))), Delta::Removed(0));
        assert_eq!(available.apply(Change::updated(task("a", 1, Status::Open, 10))), Delta::Inserted(0));

        let mut retitled = task("b", 2, Status::Open, 10);
        retitled.title = "Coil the extension leads".into();
        assert_eq!(available.apply(Change::updated(retitled)), Delta::Replaced(1));
        assert_eq!(available.items()[1].title, "Coil the extension leads");

        let mut hidden = task("b", 2, Status::Open, 10);
        hidden.archived = true;
        assert_eq!(available.apply(Change::updated(hidden)), Delta::Removed(1));
    }

    #[test]
    fn sort_key_change_moves_the_record() {
        let mut by_minutes = LiveList::new(TaskFilter::board().with_sort(SortKey::Minutes));
        by_minutes.apply(Change::created(task("a", 1, Status::Open, 10)));
        by_minutes.apply(Change::created(task("b", 2, Status::Open, 20)));
        by_minutes.apply(Change::created(task("c", 3, Status::Open, 30)));

        let delta = by_minutes.apply(Change::updated(task("a", 1, Status::Open, 25)));
        assert_eq!(delta, Delta::Moved { from: 0, to: 1 });
        assert_eq!(numbers(by_minutes.items()), vec![2, 1, 3]);
    }

    #[test]
    fn delete_removes_unconditionally_and_creates_are_idempotent() {
        let mut admin = LiveList::new(TaskFilter::admin());
        admin.apply(Change::created(task("a", 1, Status::Open, 10)));

        // A duplicate create of a changed record behaves like an update.
        assert_eq!(admin.apply(Change::created(task("a", 1, Status::InProgress, 10))), Delta::Replaced(0));
        assert_eq!(admin.apply(Change::created(task("a", 1, Status::InProgress, 10))), Delta::Ignored);

        // The deleted snapshot need not match the filter.
        let mut stale = task("a", 1, Status::Open, 10);
        stale.archived = true;
        assert_eq!(admin.apply(Change::deleted(stale)), Delta::Removed(0));
        assert_eq!(admin.apply(Change::deleted(task("zz", 9, Status::Open, 10))), Delta::Ignored);
        assert!(admin.is_empty());
    }

    #[test]
    fn dashboard_moves_claimed_task_between_lists() {
        let mut dash = Dashboard::for_volunteer("a".into());
        assert!(dash.apply(Change::created(task("t", 1, Status::Open, 10))));
        assert_eq!(dash.available.len(), 1);
        assert!(dash.mine.is_empty());

        assert!(dash.apply(Change::updated(task("t", 1, Status::InProgress, 10))));
        assert!(dash.available.is_empty());
        assert_eq!(dash.mine.len(), 1);

        let mut someone_else = task("u", 2, Status::InProgress, 10);
        someone_else.assigned_to = BTreeSet::from(["b".into()]);
        assert!(!dash.apply(Change::created(someone_else)));
    }

    #[tokio::test]
    async fn replayed_feed_matches_fresh_fetch() {
        let (store, tasks, credits) = engines();
        seed_volunteers(&store, &["staff", "a", "b"]).await;
        let filters = [
            TaskFilter::board(),
            TaskFilter::available(),
            TaskFilter::claimed_by("a".into()),
            TaskFilter::admin(),
            TaskFilter::admin().with_sort(SortKey::Minutes),
            TaskFilter::board().with_sort(SortKey::Zone),
            TaskFilter::admin().with_zone(Some(Zone::Laser)),
        ];
        let mut lists: Vec<LiveList<Task, TaskFilter>> = filters.iter().cloned().map(LiveList::new).collect();
        let mut feed = store.subscribe::<Task>();

        let staff = "staff".into();
        let zones = [Zone::Laser, Zone::Woodshop, Zone::Laser, Zone::Textiles, Zone::Electronics, Zone::Laser];
        let mut created = Vec::new();
        for (i, zone) in zones.into_iter().enumerate() {
            let draft = TaskDraft::new(format!("Job {i}"), zone, 10 * (6 - i as u32));
            created.push(tasks.create_task(draft, &staff, None).await.unwrap());
        }
        let id = |i: usize| created[i].id.clone();

        tasks.claim(&id(0), &"a".into()).await.unwrap();
        tasks.claim(&id(1), &"b".into()).await.unwrap();
        tasks.claim(&id(2), &"a".into()).await.unwrap();
        tasks.unclaim(&id(1)).await.unwrap();
        let patch = TaskPatch {
            estimated_minutes: Some(5),
            zone: Some(Zone::Laser),
            ..TaskPatch::default()
        };
        tasks.edit_task(&id(3), patch).await.unwrap();
        credits.complete(&id(2), &["a".into(), "b".into()], 40, None).await.unwrap();
        tasks.archive_task(&id(4)).await.unwrap();
        tasks.archive_task(&id(0)).await.unwrap();
        tasks.unarchive_task(&id(0)).await.unwrap();
        store.delete::<Task>(&id(5)).await.unwrap();

        while let Ok(change) = feed.try_recv() {
            for list in &mut lists {
                list.apply(change.clone());
            }
        }
        for (list, filter) in lists.iter().zip(&filters) {
            let fresh = store.list::<Task>(filter, None).await.unwrap();
            assert_eq!(list.items(), fresh.as_slice(), "filter {filter:?}");
        }
    }

    async fn next_len(rx: &mut mpsc::UnboundedReceiver<usize>, want: usize) {
        let wait = async {
            while let Some(len) = rx.recv().await {
                if len == want {
                    return;
                }
            }
            panic!("follower stopped before reaching {want} items");
        };
        tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap();
    }

    #[tokio::test]
    async fn follow_tracks_writes() {
        let (store, tasks, _) = engines();
        seed_volunteers(&store, &["staff"]).await;
        tasks.create_task(TaskDraft::new("Existing", Zone::General, 10), &"staff".into(), None).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let follower_store = store.clone();
        let follower = tokio::spawn(async move {
            let mut board = LiveList::new(TaskFilter::board());
            follow(&*follower_store, &mut board, Duration::from_millis(10), |v: &LiveList<Task, TaskFilter>| {
                let _ = tx.send(v.len());
            })
            .await;
        });

        next_len(&mut rx, 1).await;
        tasks.create_task(TaskDraft::new("New", Zone::General, 10), &"staff".into(), None).await.unwrap();
        next_len(&mut rx, 2).await;
        follower.abort();
    }

    #[tokio::test]
    async fn lagging_follower_recovers_by_refetching() {
        let store = Arc::new(LocalStore::from_database(Database::default(), None, 1));
        seed_volunteers(&store, &["staff"]).await;
        let (tasks, _) = crate::testing::engines_over(store.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let follower_store = store.clone();
        let follower = tokio::spawn(async move {
            let mut board = LiveList::new(TaskFilter::board());
            follow(&*follower_store, &mut board, Duration::from_millis(10), |v: &LiveList<Task, TaskFilter>| {
                let _ = tx.send(v.len());
            })
            .await;
        });
        next_len(&mut rx, 0).await;

        for i in 0..4 {
            tasks
                .create_task(TaskDraft::new(format!("Burst {i}"), Zone::General, 10), &"staff".into(), None)
                .await
                .unwrap();
        }
        next_len(&mut rx, 4).await;
        follower.abort();
    }
}
