use super::*;
use crate::clock::ManualClock;
use crate::error::SchedulerError;
use crate::store::MemoryTaskStore;
use crate::registry::TaskHandler;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{oneshot, Notify};

struct RecordingHandler {
    calls: AtomicUsize,
    result: Result<(), HandlerError>,
}

impl RecordingHandler {
    fn new(result: Result<(), HandlerError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

struct SlowHandler;

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

/// Blocks its first call until released; later calls succeed immediately.
struct GatedHandler {
    calls: AtomicUsize,
    entered: Notify,
    gate: parking_lot::Mutex<Option<oneshot::Receiver<()>>>,
}

impl GatedHandler {
    fn new(gate: oneshot::Receiver<()>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: parking_lot::Mutex::new(Some(gate)),
        })
    }
}

#[async_trait]
impl TaskHandler for GatedHandler {
    async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

fn setup(handler: Arc<dyn TaskHandler>) -> (Arc<MemoryTaskStore>, Processor) {
    let store = Arc::new(MemoryTaskStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register("email:reminder", handler).unwrap();
    let processor = Processor::new(store.clone(), Arc::new(registry));
    (store, processor)
}

/// Insert and claim a task, returning the message a dispatcher would send.
async fn claimed(store: &MemoryTaskStore, task: ScheduledTask) -> DispatchMessage {
    store.insert(&task).await.unwrap();
    assert!(store.claim(&task.id, task.run_at).await.unwrap());
    DispatchMessage::for_task(&task)
}

fn reminder() -> ScheduledTask {
    ScheduledTask::new("owner-1", "email:reminder", b"{}".to_vec(), t0())
}

#[tokio::test]
async fn test_one_shot_completes() {
    let handler = RecordingHandler::new(Ok(()));
    let (store, processor) = setup(handler.clone());
    let msg = claimed(&store, reminder()).await;

    let outcome = processor.process(&msg).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Finalized {
            finalization: Finalization::completed(0),
            handler: HandlerOutcome::Succeeded,
        }
    );
    assert_eq!(handler.calls(), 1);

    let task = store.get(&msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.run_at, t0());
    assert_eq!(task.recurrence_count, 0);
}

#[tokio::test]
async fn test_recurring_reschedules_from_previous_run_at() {
    let (store, processor) = setup(RecordingHandler::new(Ok(())));
    let msg = claimed(&store, reminder().with_interval(60).with_limit(3)).await;

    processor.process(&msg).await.unwrap();

    let task = store.get(&msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.run_at, t0() + TimeDelta::seconds(60));
    assert_eq!(task.recurrence_count, 1);
    assert!(task.claimed_at.is_none());
}

#[tokio::test]
async fn test_handler_failure_still_reschedules() {
    let handler = RecordingHandler::new(Err(HandlerError::Failed("smtp down".into())));
    let (store, processor) = setup(handler.clone());
    let msg = claimed(&store, reminder().with_interval(60)).await;

    let outcome = processor.process(&msg).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Finalized {
            handler: HandlerOutcome::Failed(HandlerError::Failed(_)),
            ..
        }
    ));

    let task = store.get(&msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.run_at, t0() + TimeDelta::seconds(60));
    assert_eq!(task.recurrence_count, 1);
}

#[tokio::test]
async fn test_poison_payload_completes_recurring_task() {
    let handler = RecordingHandler::new(Err(HandlerError::InvalidPayload("not json".into())));
    let (store, processor) = setup(handler);
    let msg = claimed(&store, reminder().with_interval(60).with_limit(10)).await;

    processor.process(&msg).await.unwrap();

    let task = store.get(&msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.recurrence_count, 1);
    assert_eq!(task.run_at, t0());
}

#[tokio::test]
async fn test_unknown_task_type_completes() {
    let (store, processor) = setup(RecordingHandler::new(Ok(())));
    let task = ScheduledTask::new("owner-1", "sms:send", b"{}".to_vec(), t0()).with_interval(60);
    let msg = claimed(&store, task).await;

    let outcome = processor.process(&msg).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Finalized {
            handler: HandlerOutcome::Unregistered,
            ..
        }
    ));

    let task = store.get(&msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.recurrence_count, 1);
}

#[tokio::test]
async fn test_redelivery_after_finalize_is_skipped() {
    let handler = RecordingHandler::new(Ok(()));
    let (store, processor) = setup(handler.clone());
    let msg = claimed(&store, reminder()).await;

    processor.process(&msg).await.unwrap();
    let before = store.get(&msg.task_id).await.unwrap().unwrap();

    let outcome = processor.process(&msg).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Skipped(SkipReason::NotProcessing(TaskStatus::Completed))
    );
    assert_eq!(handler.calls(), 1);
    assert_eq!(store.get(&msg.task_id).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_stale_occurrence_is_skipped() {
    let handler = RecordingHandler::new(Ok(()));
    let (store, processor) = setup(handler.clone());
    let first = claimed(&store, reminder().with_interval(60)).await;
    processor.process(&first).await.unwrap();

    // Second occurrence claimed; the first message arrives again.
    store
        .claim(&first.task_id, t0() + TimeDelta::seconds(60))
        .await
        .unwrap();
    let outcome = processor.process(&first).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::StaleOccurrence));
    assert_eq!(handler.calls(), 1);
    let task = store.get(&first.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.recurrence_count, 1);
}

#[tokio::test]
async fn test_missing_task_is_skipped() {
    let handler = RecordingHandler::new(Ok(()));
    let (_store, processor) = setup(handler.clone());
    let msg = DispatchMessage::for_task(&reminder());

    let outcome = processor.process(&msg).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::Missing));
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_pending_task_is_skipped() {
    let handler = RecordingHandler::new(Ok(()));
    let (store, processor) = setup(handler.clone());
    let task = reminder();
    store.insert(&task).await.unwrap();

    let outcome = processor
        .process(&DispatchMessage::for_task(&task))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Skipped(SkipReason::NotProcessing(TaskStatus::Pending))
    );
    assert_eq!(handler.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_counts_as_failure() {
    let store = Arc::new(MemoryTaskStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register("email:reminder", Arc::new(SlowHandler)).unwrap();
    let processor = Processor::new(store.clone(), Arc::new(registry))
        .with_handler_timeout(Duration::from_secs(1));
    let msg = claimed(&store, reminder().with_interval(60).with_limit(2)).await;

    let outcome = processor.process(&msg).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Finalized {
            finalization: Finalization::reschedule(t0() + TimeDelta::seconds(60), 1),
            handler: HandlerOutcome::Failed(HandlerError::Timeout(Duration::from_secs(1))),
        }
    );
}

#[tokio::test]
async fn test_reclaimed_processor_cannot_finalize_next_occurrence() {
    let (release, gate) = oneshot::channel();
    let handler = GatedHandler::new(gate);
    let (store, processor) = setup(handler.clone());
    let processor = Arc::new(processor);
    let first = claimed(&store, reminder().with_interval(60)).await;

    let stalled = tokio::spawn({
        let processor = processor.clone();
        let message = first.clone();
        async move { processor.process(&message).await }
    });
    handler.entered.notified().await;

    // The lease runs out while the first handler is stuck.
    let later = t0() + TimeDelta::minutes(10);
    assert_eq!(
        store.reclaim_expired(later, TimeDelta::minutes(5)).await.unwrap(),
        1
    );
    assert!(store.claim(&first.task_id, later).await.unwrap());
    let redelivered = processor.process(&first).await.unwrap();
    assert!(!redelivered.is_skipped());

    // Next occurrence is claimed before the stalled handler returns.
    assert!(store.claim(&first.task_id, later).await.unwrap());
    release.send(()).unwrap();

    let result = stalled.await.unwrap();
    assert!(matches!(result, Err(SchedulerError::StaleOccurrence { .. })));

    let task = store.get(&first.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.run_at, t0() + TimeDelta::seconds(60));
    assert_eq!(task.recurrence_count, 1);

    let outcome = processor
        .process(&DispatchMessage::for_task(&task))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Finalized {
            finalization: Finalization::reschedule(t0() + TimeDelta::seconds(120), 2),
            handler: HandlerOutcome::Succeeded,
        }
    );
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_finalize_stamped_with_clock() {
    let finished = t0() + TimeDelta::seconds(5);
    let store = Arc::new(MemoryTaskStore::new());
    let mut registry = HandlerRegistry::new();
    registry
        .register("email:reminder", RecordingHandler::new(Ok(())))
        .unwrap();
    let processor = Processor::new(store.clone(), Arc::new(registry))
        .with_clock(Arc::new(ManualClock::new(finished)));
    let msg = claimed(&store, reminder()).await;

    processor.process(&msg).await.unwrap();

    let task = store.get(&msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.updated_at, finished);
}
