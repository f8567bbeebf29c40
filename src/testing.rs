//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::crediting::CreditEngine;
use crate::fields::VolunteerId;
use crate::lifecycle::TaskEngine;
use crate::notify::Dispatcher;
use crate::store::{LocalStore, RecordStore};
use crate::volunteer::Volunteer;

pub fn volunteer(id: &str, name: &str) -> Volunteer {
    Volunteer {
        id: VolunteerId::from(id),
        identity: format!("{id}@makerspace.test"),
        name: name.to_string(),
        avatar: None,
        total_minutes: 0,
        created_at_utc: 0,
        updated_at_utc: 0,
    }
}

/// Registers one volunteer per id, named after the id.
pub async fn seed_volunteers(store: &LocalStore, ids: &[&str]) {
    for id in ids {
        store.create(volunteer(id, id)).await.unwrap();
    }
}

/// In-memory store plus both engines, announcing to the log.
pub fn engines() -> (Arc<LocalStore>, TaskEngine<LocalStore>, CreditEngine<LocalStore>) {
    let store = Arc::new(LocalStore::in_memory());
    let (tasks, credits) = engines_over(store.clone());
    (store, tasks, credits)
}

pub fn engines_over<S: RecordStore>(store: Arc<S>) -> (TaskEngine<S>, CreditEngine<S>) {
    let dispatcher = Dispatcher::default();
    (
        TaskEngine::new(store.clone(), dispatcher.clone()),
        CreditEngine::new(store, dispatcher),
    )
}
