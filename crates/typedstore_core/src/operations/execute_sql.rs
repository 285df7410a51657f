//! Raw statement execution.

use crate::changes::ChangeOrigin;
use crate::engine::{check_cancelled, logged, publish_changes, PreparedOperation};
use crate::error::{StoreError, StoreResult};
use crate::query::RawQuery;
use crate::store::Store;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Entry point returned by `Store::execute_sql`.
pub struct ExecuteSqlBuilder {
    store: Store,
}

impl ExecuteSqlBuilder {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn with_query(self, query: RawQuery) -> CompleteExecuteSqlBuilder {
        CompleteExecuteSqlBuilder {
            store: self.store,
            query,
        }
    }
}

pub struct CompleteExecuteSqlBuilder {
    store: Store,
    query: RawQuery,
}

impl CompleteExecuteSqlBuilder {
    pub fn prepare(self) -> PreparedExecuteSql {
        PreparedExecuteSql {
            store: self.store,
            query: Arc::new(self.query),
        }
    }
}

/// Prepared raw statement; publishes the query's `affected` locations.
#[derive(Clone)]
pub struct PreparedExecuteSql {
    store: Store,
    query: Arc<RawQuery>,
}

impl PreparedExecuteSql {
    pub fn query(&self) -> &RawQuery {
        &self.query
    }

    fn run(&self, cancel: &CancellationToken) -> StoreResult<()> {
        check_cancelled(cancel)?;
        self.store
            .backend()
            .execute_sql(&self.query)
            .map_err(|cause| StoreError::execution("execute_sql", cause))?;
        publish_changes(
            &self.store,
            ChangeOrigin::new("execute_sql"),
            [self.query.affected()],
        );
        Ok(())
    }
}

impl PreparedOperation for PreparedExecuteSql {
    type Output = ();

    fn store(&self) -> &Store {
        &self.store
    }

    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<()> {
        logged("execute_sql", 1, Instant::now(), self.run(cancel))
    }
}
