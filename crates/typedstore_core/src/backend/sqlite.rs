//! SQLite implementation of [`Backend`].
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Translate structured queries into SQL and bind values positionally.
//! - Track the single open transaction and commit/rollback on end.
//!
//! # Invariants
//! - Returned backends have connection pragmas applied.
//! - A transaction belongs to the thread that began it. Calls from other
//!   threads wait until it ends; they never run inside it.
//! - Nested `begin_transaction` calls on the owning thread are rejected.
//! - Log events carry metadata only (locations, counts), never row values.

use super::{Backend, BackendError, BackendResult, MaterializedRows, RowHandle};
use crate::location::StorageLocation;
use crate::query::{DeleteQuery, Filter, Query, RawQuery, UpdateQuery};
use crate::row::Row;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Connection settings applied when a backend is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    pub busy_timeout: Duration,
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
        }
    }
}

struct SqliteState {
    conn: Connection,
    transaction: Option<TransactionState>,
}

#[derive(Debug, Clone, Copy)]
struct TransactionState {
    owner: ThreadId,
    successful: bool,
}

impl SqliteState {
    fn owned_by_other_thread(&self) -> bool {
        self.transaction
            .is_some_and(|transaction| transaction.owner != thread::current().id())
    }

    fn owned_transaction(&mut self) -> Option<&mut TransactionState> {
        let current = thread::current().id();
        self.transaction
            .as_mut()
            .filter(|transaction| transaction.owner == current)
    }
}

/// Row store over one SQLite connection.
///
/// Safe to share between threads: an open transaction excludes every other
/// thread until `end_transaction`.
pub struct SqliteBackend {
    state: Mutex<SqliteState>,
    transaction_ended: Condvar,
}

impl SqliteBackend {
    /// Opens a SQLite database file with default settings.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        Self::open_with(path, &SqliteConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: &SqliteConfig) -> BackendResult<Self> {
        let path = path.as_ref();
        open_logged("file", config, || Connection::open(path))
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> BackendResult<Self> {
        Self::open_in_memory_with(&SqliteConfig::default())
    }

    pub fn open_in_memory_with(config: &SqliteConfig) -> BackendResult<Self> {
        open_logged("memory", config, Connection::open_in_memory)
    }

    /// Wraps an already opened connection.
    pub fn from_connection(conn: Connection, config: &SqliteConfig) -> BackendResult<Self> {
        configure_connection(&conn, config)?;
        Ok(Self::wrap(conn))
    }

    /// Runs `f` with the underlying connection, e.g. for schema setup.
    ///
    /// Writes made here bypass change notification.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        let state = self.lock_available();
        f(&state.conn)
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            state: Mutex::new(SqliteState {
                conn,
                transaction: None,
            }),
            transaction_ended: Condvar::new(),
        }
    }

    /// Locks the connection once no other thread owns a transaction on it.
    fn lock_available(&self) -> MutexGuard<'_, SqliteState> {
        let mut state = self.state.lock();
        if state.owned_by_other_thread() {
            debug!("event=transaction module=backend status=wait");
            while state.owned_by_other_thread() {
                self.transaction_ended.wait(&mut state);
            }
        }
        state
    }
}

impl Backend for SqliteBackend {
    fn insert(&self, location: &StorageLocation, row: &Row) -> BackendResult<Option<i64>> {
        let sql = insert_sql(location, row);
        let state = self.lock_available();
        let changed = state.conn.execute(&sql, params_from_iter(row.values()))?;
        debug!(
            "event=sqlite_exec module=backend status=ok kind=insert location={} changed={}",
            location, changed
        );

        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(state.conn.last_insert_rowid()))
    }

    fn update(&self, query: &UpdateQuery, row: &Row) -> BackendResult<usize> {
        let sql = update_sql(query, row)?;
        let state = self.lock_available();
        let changed = state.conn.execute(
            &sql,
            params_from_iter(row.values().chain(filter_args(query.filter()))),
        )?;
        debug!(
            "event=sqlite_exec module=backend status=ok kind=update location={} changed={}",
            query.location(),
            changed
        );
        Ok(changed)
    }

    fn delete(&self, query: &DeleteQuery) -> BackendResult<usize> {
        let sql = delete_sql(query);
        let state = self.lock_available();
        let changed = state
            .conn
            .execute(&sql, params_from_iter(filter_args(query.filter())))?;
        debug!(
            "event=sqlite_exec module=backend status=ok kind=delete location={} changed={}",
            query.location(),
            changed
        );
        Ok(changed)
    }

    fn query(&self, query: &Query) -> BackendResult<Box<dyn RowHandle>> {
        let sql = select_sql(query);
        let state = self.lock_available();
        let rows = read_rows(&state.conn, &sql, filter_args(query.filter()))?;
        debug!(
            "event=sqlite_query module=backend status=ok kind=structured location={} rows={}",
            query.location(),
            rows.len()
        );
        Ok(Box::new(MaterializedRows::new(rows)))
    }

    fn raw_query(&self, query: &RawQuery) -> BackendResult<Box<dyn RowHandle>> {
        let state = self.lock_available();
        let rows = read_rows(&state.conn, query.statement(), query.args())?;
        debug!(
            "event=sqlite_query module=backend status=ok kind=raw rows={}",
            rows.len()
        );
        Ok(Box::new(MaterializedRows::new(rows)))
    }

    fn execute_sql(&self, query: &RawQuery) -> BackendResult<()> {
        let state = self.lock_available();
        if query.args().is_empty() {
            state.conn.execute_batch(query.statement())?;
        } else {
            state
                .conn
                .execute(query.statement(), params_from_iter(query.args()))?;
        }
        debug!("event=sqlite_exec module=backend status=ok kind=raw");
        Ok(())
    }

    fn begin_transaction(&self) -> BackendResult<()> {
        let mut state = self.lock_available();
        if state.transaction.is_some() {
            return Err(BackendError::Transaction(
                "a transaction is already open on this thread".to_string(),
            ));
        }
        state.conn.execute_batch("BEGIN IMMEDIATE;")?;
        state.transaction = Some(TransactionState {
            owner: thread::current().id(),
            successful: false,
        });
        Ok(())
    }

    fn set_transaction_successful(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.owned_transaction() {
            Some(transaction) => {
                transaction.successful = true;
                Ok(())
            }
            None => Err(BackendError::Transaction(
                "no open transaction on this thread to mark successful".to_string(),
            )),
        }
    }

    fn end_transaction(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        let Some(transaction) = state.owned_transaction().copied() else {
            return Err(BackendError::Transaction(
                "no open transaction on this thread to end".to_string(),
            ));
        };
        state.transaction = None;
        let ended = finish_transaction(&state.conn, transaction.successful);
        drop(state);
        self.transaction_ended.notify_all();
        ended
    }
}

/// Commits or rolls back the transaction open on `conn`.
fn finish_transaction(conn: &Connection, successful: bool) -> BackendResult<()> {
    if !successful {
        conn.execute_batch("ROLLBACK;")?;
        return Ok(());
    }

    if let Err(err) = conn.execute_batch("COMMIT;") {
        // A failed COMMIT can leave the transaction open.
        if let Err(rollback_err) = conn.execute_batch("ROLLBACK;") {
            warn!(
                "event=transaction module=backend status=error error_code=rollback_after_commit_failed error={}",
                rollback_err
            );
        }
        return Err(err.into());
    }
    Ok(())
}

fn open_logged(
    mode: &'static str,
    config: &SqliteConfig,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> BackendResult<SqliteBackend> {
    let started_at = Instant::now();
    info!("event=db_open module=backend status=start mode={mode}");

    let conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=backend status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match configure_connection(&conn, config) {
        Ok(()) => {
            info!(
                "event=db_open module=backend status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(SqliteBackend::wrap(conn))
        }
        Err(err) => {
            error!(
                "event=db_open module=backend status=error mode={} duration_ms={} error_code=db_configure_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure_connection(conn: &Connection, config: &SqliteConfig) -> BackendResult<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(config.busy_timeout)?;
    Ok(())
}

fn read_rows(conn: &Connection, sql: &str, args: &[Value]) -> BackendResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt.query(params_from_iter(args))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut mapped = Row::new();
        for (index, column) in columns.iter().enumerate() {
            mapped.put(column.clone(), row.get::<_, Value>(index)?);
        }
        result.push(mapped);
    }
    Ok(result)
}

fn filter_args(filter: Option<&Filter>) -> &[Value] {
    match filter {
        Some(filter) => filter.args(),
        None => &[],
    }
}

fn push_where(sql: &mut String, filter: Option<&Filter>) {
    if let Some(filter) = filter {
        if !filter.clause().trim().is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(filter.clause());
        }
    }
}

fn select_sql(query: &Query) -> String {
    let mut sql = String::from("SELECT ");
    if query.distinct() {
        sql.push_str("DISTINCT ");
    }
    if query.columns().is_empty() {
        sql.push('*');
    } else {
        sql.push_str(&query.columns().join(", "));
    }
    sql.push_str(" FROM ");
    sql.push_str(query.location().as_str());
    push_where(&mut sql, query.filter());

    if let Some(group_by) = query.group_by() {
        sql.push_str(" GROUP BY ");
        sql.push_str(group_by);
        if let Some(having) = query.having() {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
    }
    if let Some(order_by) = query.order_by() {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    if let Some(limit) = query.limit() {
        sql.push_str(&format!(" LIMIT {}", limit.count));
        if limit.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", limit.offset));
        }
    }
    sql
}

fn insert_sql(location: &StorageLocation, row: &Row) -> String {
    if row.is_empty() {
        return format!("INSERT INTO {location} DEFAULT VALUES");
    }
    let columns: Vec<&str> = row.columns().collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {location} ({}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

fn update_sql(query: &UpdateQuery, row: &Row) -> BackendResult<String> {
    if row.is_empty() {
        return Err(BackendError::InvalidQuery(format!(
            "update of `{}` has no column values",
            query.location()
        )));
    }
    let assignments: Vec<String> = row.columns().map(|column| format!("{column} = ?")).collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        query.location(),
        assignments.join(", ")
    );
    push_where(&mut sql, query.filter());
    Ok(sql)
}

fn delete_sql(query: &DeleteQuery) -> String {
    let mut sql = format!("DELETE FROM {}", query.location());
    push_where(&mut sql, query.filter());
    sql
}

#[cfg(test)]
mod tests {
    use super::{delete_sql, insert_sql, select_sql, SqliteBackend};
    use crate::backend::{Backend, BackendError, RowHandle};
    use crate::location::StorageLocation;
    use crate::query::{DeleteQuery, Filter, Query, RawQuery, UpdateQuery};
    use crate::row::Row;
    use std::thread;
    use std::time::Duration;

    fn backend_with_items() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_sql(
                &RawQuery::builder()
                    .statement("CREATE TABLE items (_id INTEGER PRIMARY KEY, value TEXT NOT NULL);")
                    .build(),
            )
            .unwrap();
        backend
    }

    fn count_items(backend: &SqliteBackend) -> usize {
        backend
            .query(&Query::builder().table("items").build())
            .unwrap()
            .count()
    }

    #[test]
    fn select_sql_renders_every_clause() {
        let query = Query::builder()
            .table("items")
            .distinct(true)
            .columns(["_id", "value"])
            .filter(Filter::eq("value", "a".to_string()))
            .group_by("value")
            .having("COUNT(*) > 1")
            .order_by("_id")
            .limit_offset(2, 5)
            .build();

        assert_eq!(
            select_sql(&query),
            "SELECT DISTINCT _id, value FROM items WHERE value = ? GROUP BY value \
             HAVING COUNT(*) > 1 ORDER BY _id LIMIT 5 OFFSET 2"
        );
    }

    #[test]
    fn insert_and_delete_sql_shapes() {
        let row = Row::new().with("value", "v".to_string()).with("_id", 1_i64);
        assert_eq!(
            insert_sql(&StorageLocation::table("items"), &row),
            "INSERT INTO items (_id, value) VALUES (?, ?)"
        );
        assert_eq!(
            insert_sql(&StorageLocation::table("items"), &Row::new()),
            "INSERT INTO items DEFAULT VALUES"
        );
        assert_eq!(
            delete_sql(&DeleteQuery::new("items", None)),
            "DELETE FROM items"
        );
    }

    #[test]
    fn insert_update_query_and_delete_roundtrip() {
        let backend = backend_with_items();
        let location = StorageLocation::table("items");

        let id = backend
            .insert(&location, &Row::new().with("value", "first".to_string()))
            .unwrap()
            .expect("row should be written");

        let updated = backend
            .update(
                &UpdateQuery::new("items", Some(Filter::eq("_id", id))),
                &Row::new().with("value", "second".to_string()),
            )
            .unwrap();
        assert_eq!(updated, 1);

        let mut rows = backend
            .query(
                &Query::builder()
                    .table("items")
                    .filter(Filter::eq("_id", id))
                    .build(),
            )
            .unwrap();
        let row = rows.next_row().unwrap();
        rows.close();
        assert_eq!(row.text("value").unwrap(), "second");

        let deleted = backend
            .delete(&DeleteQuery::new("items", Some(Filter::eq("_id", id))))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(count_items(&backend), 0);
    }

    #[test]
    fn unsuccessful_transaction_rolls_back() {
        let backend = backend_with_items();
        let location = StorageLocation::table("items");

        backend.begin_transaction().unwrap();
        backend
            .insert(&location, &Row::new().with("value", "discarded".to_string()))
            .unwrap();
        backend.end_transaction().unwrap();
        assert_eq!(count_items(&backend), 0);

        backend.begin_transaction().unwrap();
        backend
            .insert(&location, &Row::new().with("value", "kept".to_string()))
            .unwrap();
        backend.set_transaction_successful().unwrap();
        backend.end_transaction().unwrap();
        assert_eq!(count_items(&backend), 1);
        assert!(!backend.in_transaction());
    }

    #[test]
    fn nested_or_unbalanced_transactions_are_rejected() {
        let backend = backend_with_items();

        assert!(matches!(
            backend.end_transaction(),
            Err(BackendError::Transaction(_))
        ));
        assert!(matches!(
            backend.set_transaction_successful(),
            Err(BackendError::Transaction(_))
        ));

        backend.begin_transaction().unwrap();
        assert!(matches!(
            backend.begin_transaction(),
            Err(BackendError::Transaction(_))
        ));
        backend.end_transaction().unwrap();
    }

    #[test]
    fn other_threads_wait_for_the_open_transaction() {
        let backend = backend_with_items();
        let location = StorageLocation::table("items");

        backend.begin_transaction().unwrap();
        backend
            .insert(&location, &Row::new().with("value", "discarded".to_string()))
            .unwrap();

        thread::scope(|scope| {
            let writer = scope.spawn(|| {
                assert!(matches!(
                    backend.end_transaction(),
                    Err(BackendError::Transaction(_))
                ));
                backend.insert(&location, &Row::new().with("value", "other".to_string()))
            });

            thread::sleep(Duration::from_millis(100));
            assert!(!writer.is_finished());
            backend.end_transaction().unwrap();

            assert!(writer.join().unwrap().unwrap().is_some());
        });

        let mut rows = backend
            .query(&Query::builder().table("items").build())
            .unwrap();
        let row = rows.next_row().unwrap();
        assert!(rows.next_row().is_none());
        rows.close();
        assert_eq!(row.text("value").unwrap(), "other");
    }

    #[test]
    fn empty_update_is_invalid() {
        let backend = backend_with_items();
        let err = backend
            .update(&UpdateQuery::new("items", None), &Row::new())
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidQuery(_)));
    }

    #[test]
    fn raw_query_binds_arguments() {
        let backend = backend_with_items();
        backend
            .execute_sql(
                &RawQuery::builder()
                    .statement("INSERT INTO items (value) VALUES (?1)")
                    .args(["raw".to_string()])
                    .build(),
            )
            .unwrap();

        let mut rows = backend
            .raw_query(
                &RawQuery::builder()
                    .statement("SELECT value FROM items WHERE value = ?1")
                    .args(["raw".to_string()])
                    .build(),
            )
            .unwrap();
        assert_eq!(rows.count(), 1);
        assert_eq!(rows.next_row().unwrap().text("value").unwrap(), "raw");
        rows.close();
    }
}
