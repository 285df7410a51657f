mod common;

use common::{items_query, store_with_mapping, text, RecordingBackend, TestItem};
use typedstore_core::{
    BoxError, GetQuery, GetResolver, PreparedOperation, RawQuery, Row, RowError, RowHandle,
    Store, StoreError,
};

#[test]
fn mapping_failure_closes_handle_exactly_once() {
    let backend = RecordingBackend::new();
    backend.script_rows(vec![Row::new().with("_id", 1_i64)]);
    let store = store_with_mapping(&backend);

    let err = store
        .get()
        .list_of_objects::<TestItem>()
        .with_query(items_query())
        .prepare()
        .execute()
        .unwrap_err();

    match &err {
        StoreError::Execution { operation, cause } => {
            assert_eq!(*operation, "get_list");
            assert_eq!(
                cause.downcast_ref::<RowError>(),
                Some(&RowError::MissingColumn("value".to_string()))
            );
        }
        other => panic!("expected execution error, got {other:?}"),
    }
    assert_eq!(backend.calls("query"), 1);
    assert_eq!(backend.handle_stats.counts(), (1, 1, 1));
}

#[test]
fn single_object_mapping_failure_closes_handle_once() {
    let backend = RecordingBackend::new();
    backend.script_rows(vec![Row::new().with("_id", text("not a number"))]);
    let store = store_with_mapping(&backend);

    let err = store
        .get()
        .object::<TestItem>()
        .with_query(items_query())
        .prepare()
        .execute()
        .unwrap_err();

    assert_eq!(err.code(), "execution_failed");
    let (_, next_calls, close_calls) = backend.handle_stats.counts();
    assert_eq!(next_calls, 1);
    assert_eq!(close_calls, 1);
}

#[test]
fn successful_reads_close_handle_once() {
    let backend = RecordingBackend::new();
    backend.script_rows(vec![
        Row::new().with("_id", 1_i64).with("value", text("a")),
        Row::new().with("_id", 2_i64).with("value", text("b")),
    ]);
    let store = store_with_mapping(&backend);

    let items = store
        .get()
        .list_of_objects::<TestItem>()
        .with_query(items_query())
        .prepare()
        .execute()
        .unwrap();

    assert_eq!(
        items,
        vec![TestItem::with_id(1, "a"), TestItem::with_id(2, "b")]
    );
    let (_, _, close_calls) = backend.handle_stats.counts();
    assert_eq!(close_calls, 1);
}

#[test]
fn empty_object_read_returns_none_without_mapping_rows() {
    let backend = RecordingBackend::new();
    backend.script_rows(Vec::new());
    let store = store_with_mapping(&backend);

    let item = store
        .get()
        .object::<TestItem>()
        .with_query(items_query())
        .prepare()
        .execute()
        .unwrap();

    assert_eq!(item, None);
    assert_eq!(backend.handle_stats.counts(), (1, 0, 1));
}

#[test]
fn number_of_results_counts_without_reading_rows() {
    let backend = RecordingBackend::new();
    backend.script_rows(vec![Row::new(), Row::new(), Row::new()]);
    let store = store_with_mapping(&backend);

    let count = store
        .get()
        .number_of_results()
        .with_query(items_query())
        .prepare()
        .execute()
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(backend.handle_stats.counts(), (1, 0, 1));
}

#[test]
fn raw_queries_go_through_raw_query() {
    let backend = RecordingBackend::new();
    backend.script_rows(vec![Row::new().with("value", text("x"))]);
    let store = store_with_mapping(&backend);

    let rows = store
        .get()
        .rows()
        .with_query(
            RawQuery::builder()
                .statement("SELECT value FROM items")
                .observes(["items"])
                .build(),
        )
        .prepare()
        .execute()
        .unwrap();

    assert_eq!(rows, vec![Row::new().with("value", text("x"))]);
    assert_eq!(backend.calls("raw_query"), 1);
    assert_eq!(backend.calls("query"), 0);
}

struct FailingOpenResolver;

impl GetResolver<TestItem> for FailingOpenResolver {
    fn perform_get(&self, _store: &Store, _query: &GetQuery) -> Result<Box<dyn RowHandle>, BoxError> {
        Err("backend unavailable".into())
    }

    fn map_from_row(&self, _row: &Row) -> Result<TestItem, BoxError> {
        unreachable!("no rows are opened")
    }
}

#[test]
fn failure_to_open_rows_is_wrapped() {
    let backend = RecordingBackend::new();
    let store = store_with_mapping(&backend);

    let err = store
        .get()
        .list_of_objects::<TestItem>()
        .with_query(items_query())
        .with_get_resolver(FailingOpenResolver)
        .prepare()
        .execute()
        .unwrap_err();

    assert_eq!(err.cause().unwrap().to_string(), "backend unavailable");
    assert_eq!(backend.handle_stats.counts(), (0, 0, 0));
}
