//! Behavior every `TaskStore` implementation must share.
//!
//! Each function exercises one rule against any store; the memory and
//! SQLite test modules run the whole set.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::store::TaskStore;
use crate::task::{Finalization, ScheduledTask, TaskStatus};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

pub(crate) fn task_at(run_at: DateTime<Utc>) -> ScheduledTask {
    ScheduledTask::new("owner-1", "email:reminder", br#"{"k":"v"}"#.to_vec(), run_at)
}

pub(crate) async fn insert_and_get(store: &dyn TaskStore) {
    let task = task_at(t0()).with_interval(60).with_limit(3);
    let id = store.insert(&task).await.unwrap();
    assert_eq!(id, task.id);

    let loaded = store.get(&id).await.unwrap().unwrap();
    assert_eq!(loaded.owner_id, "owner-1");
    assert_eq!(loaded.task_type, "email:reminder");
    assert_eq!(loaded.payload, task.payload);
    assert_eq!(loaded.run_at, t0());
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.recurrence_interval, Some(60));
    assert_eq!(loaded.recurrence_limit, Some(3));
    assert_eq!(loaded.recurrence_count, 0);

    assert!(store.get(&Uuid::new_v4()).await.unwrap().is_none());
}

pub(crate) async fn insert_rejects_inconsistent_recurrence(store: &dyn TaskStore) {
    let task = task_at(t0()).with_limit(2);
    let result = store.insert(&task).await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
    assert!(store.get(&task.id).await.unwrap().is_none());
}

pub(crate) async fn select_due_filters_and_orders(store: &dyn TaskStore) {
    let late = task_at(t0() + TimeDelta::seconds(30));
    let early = task_at(t0() - TimeDelta::seconds(30));
    let future = task_at(t0() + TimeDelta::hours(1));
    let tie_a = task_at(t0());
    let tie_b = task_at(t0());
    let claimed = task_at(t0() - TimeDelta::minutes(5));

    for task in [&late, &early, &future, &tie_a, &tie_b, &claimed] {
        store.insert(task).await.unwrap();
    }
    assert!(store.claim(&claimed.id, t0()).await.unwrap());

    let now = t0() + TimeDelta::seconds(30);
    let due = store.select_due(now, 100).await.unwrap();

    let (first_tie, second_tie) = if tie_a.id < tie_b.id {
        (tie_a.id, tie_b.id)
    } else {
        (tie_b.id, tie_a.id)
    };
    let ids: Vec<Uuid> = due.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![early.id, first_tie, second_tie, late.id]);
    assert!(due.iter().all(|t| t.run_at <= now && t.status == TaskStatus::Pending));

    let limited = store.select_due(now, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, early.id);
}

pub(crate) async fn claim_is_exclusive(store: &dyn TaskStore) {
    let task = task_at(t0());
    store.insert(&task).await.unwrap();

    assert!(store.claim(&task.id, t0()).await.unwrap());
    assert!(!store.claim(&task.id, t0()).await.unwrap());

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Processing);
    assert_eq!(loaded.claimed_at, Some(t0()));

    assert!(!store.claim(&Uuid::new_v4(), t0()).await.unwrap());
}

pub(crate) async fn concurrent_claims_single_winner(store: Arc<dyn TaskStore>) {
    let task = task_at(t0());
    store.insert(&task).await.unwrap();

    let attempts = (0..16).map(|_| {
        let store = store.clone();
        let id = task.id;
        tokio::spawn(async move { store.claim(&id, t0()).await.unwrap() })
    });
    let results = futures::future::join_all(attempts).await;
    let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
    assert_eq!(winners, 1);
}

pub(crate) async fn release_reverts_claim(store: &dyn TaskStore) {
    let task = task_at(t0());
    store.insert(&task).await.unwrap();

    assert!(!store.release(&task.id, t0()).await.unwrap());
    assert!(store.claim(&task.id, t0()).await.unwrap());
    assert!(store.release(&task.id, t0()).await.unwrap());

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert!(loaded.claimed_at.is_none());
    assert_eq!(store.select_due(t0(), 10).await.unwrap().len(), 1);
}

pub(crate) async fn reclaim_only_expired_leases(store: &dyn TaskStore) {
    let stale = task_at(t0());
    let fresh = task_at(t0());
    store.insert(&stale).await.unwrap();
    store.insert(&fresh).await.unwrap();

    store.claim(&stale.id, t0()).await.unwrap();
    store
        .claim(&fresh.id, t0() + TimeDelta::minutes(4))
        .await
        .unwrap();

    let now = t0() + TimeDelta::minutes(5);
    let reclaimed = store.reclaim_expired(now, TimeDelta::minutes(5)).await.unwrap();
    assert_eq!(reclaimed, 1);

    let stale = store.get(&stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, TaskStatus::Pending);
    assert!(stale.claimed_at.is_none());

    let fresh = store.get(&fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, TaskStatus::Processing);
}

pub(crate) async fn finalize_requires_processing(store: &dyn TaskStore) {
    let task = task_at(t0()).with_interval(60);
    store.insert(&task).await.unwrap();

    let next = Finalization::reschedule(t0() + TimeDelta::seconds(60), 1);
    let result = store.finalize(&task.id, t0(), next, t0()).await;
    assert!(matches!(
        result,
        Err(SchedulerError::InvalidTransition { status: TaskStatus::Pending, .. })
    ));

    store.claim(&task.id, t0()).await.unwrap();
    store.finalize(&task.id, t0(), next, t0()).await.unwrap();

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.run_at, t0() + TimeDelta::seconds(60));
    assert_eq!(loaded.recurrence_count, 1);
    assert!(loaded.claimed_at.is_none());

    let missing = store.finalize(&Uuid::new_v4(), t0(), next, t0()).await;
    assert!(matches!(missing, Err(SchedulerError::TaskNotFound(_))));
}

pub(crate) async fn completed_is_absorbing(store: &dyn TaskStore) {
    let task = task_at(t0());
    store.insert(&task).await.unwrap();
    store.claim(&task.id, t0()).await.unwrap();
    store
        .finalize(&task.id, t0(), Finalization::completed(0), t0())
        .await
        .unwrap();

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Completed);
    assert_eq!(loaded.run_at, t0());

    assert!(!store.claim(&task.id, t0()).await.unwrap());
    assert!(!store.release(&task.id, t0()).await.unwrap());
    assert!(store.select_due(t0() + TimeDelta::days(1), 10).await.unwrap().is_empty());
    assert!(store
        .finalize(&task.id, t0(), Finalization::completed(0), t0())
        .await
        .is_err());
}

/// A processor whose lease expired must not finalize the occurrence that
/// replaced its claim.
pub(crate) async fn superseded_claim_cannot_finalize(store: &dyn TaskStore) {
    let task = task_at(t0()).with_interval(60);
    store.insert(&task).await.unwrap();
    let lease = TimeDelta::minutes(5);

    // First claim stalls past its lease and is reclaimed.
    assert!(store.claim(&task.id, t0()).await.unwrap());
    let reclaim_at = t0() + TimeDelta::minutes(10);
    assert_eq!(store.reclaim_expired(reclaim_at, lease).await.unwrap(), 1);

    // The redelivered occurrence is finalized, then the next one is claimed.
    assert!(store.claim(&task.id, reclaim_at).await.unwrap());
    let next = Finalization::reschedule(t0() + TimeDelta::seconds(60), 1);
    store.finalize(&task.id, t0(), next, reclaim_at).await.unwrap();
    assert!(store.claim(&task.id, reclaim_at).await.unwrap());

    let late = t0() + TimeDelta::minutes(11);
    let stale = Finalization::reschedule(t0() + TimeDelta::seconds(60), 1);
    let result = store.finalize(&task.id, t0(), stale, late).await;
    assert!(matches!(
        result,
        Err(SchedulerError::StaleOccurrence { occurrence, current, .. })
            if occurrence == t0() && current == t0() + TimeDelta::seconds(60)
    ));

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Processing);
    assert_eq!(loaded.run_at, t0() + TimeDelta::seconds(60));
    assert_eq!(loaded.claimed_at, Some(reclaim_at));
    assert_eq!(loaded.recurrence_count, 1);
    assert_eq!(loaded.updated_at, reclaim_at);

    // The current claim still finalizes normally.
    let after = Finalization::reschedule(t0() + TimeDelta::seconds(120), 2);
    store
        .finalize(&task.id, t0() + TimeDelta::seconds(60), after, late)
        .await
        .unwrap();
}

pub(crate) async fn transitions_stamp_updated_at(store: &dyn TaskStore) {
    let task = task_at(t0()).stamped_at(t0() - TimeDelta::days(1));
    store.insert(&task).await.unwrap();
    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.created_at, t0() - TimeDelta::days(1));
    assert_eq!(loaded.updated_at, t0() - TimeDelta::days(1));

    let claimed = t0() + TimeDelta::seconds(1);
    store.claim(&task.id, claimed).await.unwrap();
    assert_eq!(store.get(&task.id).await.unwrap().unwrap().updated_at, claimed);

    let released = t0() + TimeDelta::seconds(2);
    store.release(&task.id, released).await.unwrap();
    assert_eq!(store.get(&task.id).await.unwrap().unwrap().updated_at, released);

    store.claim(&task.id, t0() + TimeDelta::seconds(3)).await.unwrap();
    let finalized = t0() + TimeDelta::seconds(4);
    store
        .finalize(&task.id, t0(), Finalization::completed(0), finalized)
        .await
        .unwrap();

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.updated_at, finalized);
    assert_eq!(loaded.created_at, t0() - TimeDelta::days(1));
}
