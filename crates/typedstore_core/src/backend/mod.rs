//! Storage backend contract and row handles.
//!
//! # Responsibility
//! - Define the minimal row-store surface the execution engine depends on.
//! - Define row handles whose release is owned by the caller.
//!
//! # Invariants
//! - Backends never publish change notifications; the engine does.
//! - A transaction is owned by the single engine invocation that began it.
//!
//! # See also
//! - `sqlite` for the reference implementation.

use crate::location::StorageLocation;
use crate::query::{DeleteQuery, Query, RawQuery, UpdateQuery};
use crate::row::Row;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod sqlite;

pub use sqlite::{SqliteBackend, SqliteConfig};

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug)]
pub enum BackendError {
    Sqlite(rusqlite::Error),
    /// Transaction calls arrived out of order (nested begin, end without begin).
    Transaction(String),
    InvalidQuery(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Transaction(message) => write!(f, "transaction state error: {message}"),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Transaction(_) | Self::InvalidQuery(_) => None,
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Row-store operations consumed by resolvers and the execution engine.
pub trait Backend: Send + Sync {
    /// Inserts one row; `None` when the backend wrote nothing.
    fn insert(&self, location: &StorageLocation, row: &Row) -> BackendResult<Option<i64>>;
    /// Returns the number of rows updated.
    fn update(&self, query: &UpdateQuery, row: &Row) -> BackendResult<usize>;
    /// Returns the number of rows deleted.
    fn delete(&self, query: &DeleteQuery) -> BackendResult<usize>;
    fn query(&self, query: &Query) -> BackendResult<Box<dyn RowHandle>>;
    fn raw_query(&self, query: &RawQuery) -> BackendResult<Box<dyn RowHandle>>;
    fn execute_sql(&self, query: &RawQuery) -> BackendResult<()>;
    fn begin_transaction(&self) -> BackendResult<()>;
    fn set_transaction_successful(&self) -> BackendResult<()>;
    /// Commits when marked successful, rolls back otherwise.
    fn end_transaction(&self) -> BackendResult<()>;
}

/// Forward-only cursor over a read result.
///
/// Whoever holds the handle must call `close` exactly once; the engine does so
/// through a scoped guard.
pub trait RowHandle: Send {
    fn count(&self) -> usize;
    fn next_row(&mut self) -> Option<Row>;
    fn close(&mut self);
}

/// Fully materialized rows; what the SQLite backend hands out.
#[derive(Debug)]
pub struct MaterializedRows {
    rows: std::vec::IntoIter<Row>,
    count: usize,
    closed: bool,
}

impl MaterializedRows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            count: rows.len(),
            rows: rows.into_iter(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowHandle for MaterializedRows {
    fn count(&self) -> usize {
        self.count
    }

    fn next_row(&mut self) -> Option<Row> {
        if self.closed {
            return None;
        }
        self.rows.next()
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows = Vec::new().into_iter();
    }
}

#[cfg(test)]
mod tests {
    use super::{MaterializedRows, RowHandle};
    use crate::row::Row;

    #[test]
    fn materialized_rows_stop_after_close() {
        let mut rows = MaterializedRows::new(vec![
            Row::new().with("_id", 1_i64),
            Row::new().with("_id", 2_i64),
        ]);
        assert_eq!(rows.count(), 2);
        assert!(rows.next_row().is_some());

        rows.close();
        assert!(rows.is_closed());
        assert!(rows.next_row().is_none());
    }
}
