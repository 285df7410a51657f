mod common;

use common::{items_query, store_with_mapping, ManualScheduler, RecordingBackend, TestItem};
use std::sync::Arc;
use typedstore_core::{PreparedOperation, Store, StoreError, TokioScheduler};

#[test]
fn wait_blocks_until_worker_delivers() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);

    let result = store
        .put()
        .object(TestItem::new("async"))
        .prepare()
        .execute_async()
        .wait()
        .unwrap();

    assert!(result.was_inserted());
    assert_eq!(backend.calls("insert"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn awaiting_pending_operation_yields_result() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);

    store
        .put()
        .objects(vec![TestItem::new("a"), TestItem::new("b")])
        .prepare()
        .execute_async()
        .await
        .unwrap();

    let items = store
        .get()
        .list_of_objects::<TestItem>()
        .with_query(items_query())
        .prepare()
        .execute_async()
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tokio_scheduler_runs_on_blocking_pool() {
    let backend = RecordingBackend::new();
    let store = Store::builder()
        .shared_backend(backend.clone())
        .add_type_mapping(common::item_mapping())
        .unwrap()
        .scheduler(Arc::new(TokioScheduler::current().unwrap()))
        .build()
        .unwrap();

    let count = store
        .get()
        .number_of_results()
        .with_query(items_query())
        .prepare()
        .execute_async()
        .await
        .unwrap();

    assert_eq!(count, 0);
    assert_eq!(backend.calls("query"), 1);
}

#[test]
fn cancel_before_start_skips_backend() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);
    let scheduler = ManualScheduler::default();

    let pending = store
        .put()
        .object(TestItem::new("never"))
        .prepare()
        .execute_on(&scheduler);
    assert_eq!(scheduler.pending(), 1);

    pending.cancel();
    assert!(pending.is_cancelled());
    scheduler.run_all();

    assert!(matches!(pending.wait(), Err(StoreError::Cancelled)));
    assert_eq!(backend.total_calls(), 0);
}

#[test]
fn dropping_pending_operation_cancels_queued_work() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);
    let scheduler = ManualScheduler::default();

    let pending = store
        .delete()
        .object(TestItem::with_id(1, "a"))
        .prepare()
        .execute_on(&scheduler);
    drop(pending);
    scheduler.run_all();

    assert_eq!(backend.total_calls(), 0);
}

#[test]
fn result_is_delivered_once_job_runs() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);
    let scheduler = ManualScheduler::default();
    let mut changes = store.observe_changes_in(["items"]);

    let pending = store
        .put()
        .object(TestItem::new("queued"))
        .prepare()
        .execute_on(&scheduler);
    assert!(changes.try_recv().is_none());

    scheduler.run_all();

    assert!(pending.wait().unwrap().was_inserted());
    assert!(changes.try_recv().is_some());
}

#[test]
fn prepared_operation_runs_again_on_each_async_call() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);
    let count = store
        .get()
        .number_of_results()
        .with_query(items_query())
        .prepare();

    assert_eq!(count.execute_async().wait().unwrap(), 0);
    store
        .put()
        .object(TestItem::new("x"))
        .prepare()
        .execute()
        .unwrap();
    assert_eq!(count.execute_async().wait().unwrap(), 1);
}
