#![allow(dead_code)]

use rusqlite::types::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use typedstore_core::{
    Backend, BackendResult, BoxError, DeleteQuery, Filter, Job, Query, RawQuery, Row, RowHandle,
    RowMapper, Scheduler, SqliteBackend, StorageLocation, Store, TypeMapping, UpdateQuery,
};

pub const ITEMS: &str = "items";

pub const CREATE_ITEMS: &str =
    "CREATE TABLE items (_id INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT NOT NULL);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestItem {
    pub id: Option<i64>,
    pub value: String,
}

impl TestItem {
    pub fn new(value: &str) -> Self {
        Self {
            id: None,
            value: value.to_string(),
        }
    }

    pub fn with_id(id: i64, value: &str) -> Self {
        Self {
            id: Some(id),
            value: value.to_string(),
        }
    }
}

pub struct TestItemMapper;

impl RowMapper<TestItem> for TestItemMapper {
    fn location(&self) -> StorageLocation {
        StorageLocation::table(ITEMS)
    }

    fn to_row(&self, item: &TestItem) -> Row {
        let mut row = Row::new().with("value", item.value.clone());
        if let Some(id) = item.id {
            row.put("_id", id);
        }
        row
    }

    fn from_row(&self, row: &Row) -> Result<TestItem, BoxError> {
        Ok(TestItem {
            id: row.opt_i64("_id")?,
            value: row.text("value")?,
        })
    }

    fn key_filter(&self, item: &TestItem) -> Option<Filter> {
        item.id.map(|id| Filter::eq("_id", id))
    }
}

pub fn item_mapping() -> TypeMapping<TestItem> {
    TypeMapping::from_mapper(TestItemMapper)
}

/// Call counters and row-handle bookkeeping shared with the test body.
#[derive(Default)]
pub struct HandleStats {
    pub count_calls: AtomicUsize,
    pub next_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
}

impl HandleStats {
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.count_calls.load(Ordering::SeqCst),
            self.next_calls.load(Ordering::SeqCst),
            self.close_calls.load(Ordering::SeqCst),
        )
    }
}

/// Row handle that serves scripted rows and records every call.
pub struct ScriptedRows {
    rows: VecDeque<Row>,
    total: usize,
    stats: Arc<HandleStats>,
}

impl ScriptedRows {
    pub fn new(rows: Vec<Row>, stats: Arc<HandleStats>) -> Self {
        Self {
            total: rows.len(),
            rows: rows.into(),
            stats,
        }
    }
}

impl RowHandle for ScriptedRows {
    fn count(&self) -> usize {
        self.stats.count_calls.fetch_add(1, Ordering::SeqCst);
        self.total
    }

    fn next_row(&mut self) -> Option<Row> {
        self.stats.next_calls.fetch_add(1, Ordering::SeqCst);
        self.rows.pop_front()
    }

    fn close(&mut self) {
        self.stats.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend wrapper over in-memory SQLite that records each call by name.
///
/// When scripted rows are set, reads return them instead of querying SQLite.
pub struct RecordingBackend {
    inner: SqliteBackend,
    calls: Mutex<BTreeMap<&'static str, usize>>,
    scripted: Mutex<Option<Vec<Row>>>,
    pub handle_stats: Arc<HandleStats>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        let inner = SqliteBackend::open_in_memory().unwrap();
        inner
            .with_connection(|conn| conn.execute_batch(CREATE_ITEMS))
            .unwrap();
        Arc::new(Self {
            inner,
            calls: Mutex::new(BTreeMap::new()),
            scripted: Mutex::new(None),
            handle_stats: Arc::new(HandleStats::default()),
        })
    }

    pub fn script_rows(&self, rows: Vec<Row>) {
        *self.scripted.lock().unwrap() = Some(rows);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn sqlite(&self) -> &SqliteBackend {
        &self.inner
    }

    fn record(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
    }

    fn scripted_handle(&self) -> Option<Box<dyn RowHandle>> {
        let rows = self.scripted.lock().unwrap().clone()?;
        Some(Box::new(ScriptedRows::new(
            rows,
            Arc::clone(&self.handle_stats),
        )))
    }
}

impl Backend for RecordingBackend {
    fn insert(&self, location: &StorageLocation, row: &Row) -> BackendResult<Option<i64>> {
        self.record("insert");
        self.inner.insert(location, row)
    }

    fn update(&self, query: &UpdateQuery, row: &Row) -> BackendResult<usize> {
        self.record("update");
        self.inner.update(query, row)
    }

    fn delete(&self, query: &DeleteQuery) -> BackendResult<usize> {
        self.record("delete");
        self.inner.delete(query)
    }

    fn query(&self, query: &Query) -> BackendResult<Box<dyn RowHandle>> {
        self.record("query");
        match self.scripted_handle() {
            Some(handle) => Ok(handle),
            None => self.inner.query(query),
        }
    }

    fn raw_query(&self, query: &RawQuery) -> BackendResult<Box<dyn RowHandle>> {
        self.record("raw_query");
        match self.scripted_handle() {
            Some(handle) => Ok(handle),
            None => self.inner.raw_query(query),
        }
    }

    fn execute_sql(&self, query: &RawQuery) -> BackendResult<()> {
        self.record("execute_sql");
        self.inner.execute_sql(query)
    }

    fn begin_transaction(&self) -> BackendResult<()> {
        self.record("begin_transaction");
        self.inner.begin_transaction()
    }

    fn set_transaction_successful(&self) -> BackendResult<()> {
        self.record("set_transaction_successful");
        self.inner.set_transaction_successful()
    }

    fn end_transaction(&self) -> BackendResult<()> {
        self.record("end_transaction");
        self.inner.end_transaction()
    }
}

/// Store over `backend` with the `TestItem` mapping registered.
pub fn store_with_mapping(backend: &Arc<RecordingBackend>) -> Store {
    Store::builder()
        .shared_backend(backend.clone())
        .add_type_mapping(item_mapping())
        .unwrap()
        .build()
        .unwrap()
}

/// Store over `backend` with no type mappings.
pub fn store_without_mapping(backend: &Arc<RecordingBackend>) -> Store {
    Store::builder()
        .shared_backend(backend.clone())
        .build()
        .unwrap()
}

pub fn items_query() -> Query {
    Query::builder().table(ITEMS).order_by("_id").build()
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

/// Scheduler that queues jobs until the test runs them.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<Job>>,
}

impl ManualScheduler {
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn run_all(&self) {
        let jobs: Vec<Job> = std::mem::take(&mut *self.jobs.lock().unwrap());
        for job in jobs {
            job();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }
}
