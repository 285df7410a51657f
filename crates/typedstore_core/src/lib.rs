//! Typed persistence access layer over a row store.
//! Maps domain types to rows through registered resolvers, executes staged
//! prepared operations, and publishes change events per storage location.

pub mod backend;
pub mod changes;
pub mod engine;
pub mod error;
pub mod live;
pub mod location;
pub mod logging;
pub mod mapping;
pub mod notifier;
pub mod operations;
pub mod query;
pub mod row;
pub mod store;

pub use backend::{
    Backend, BackendError, BackendResult, MaterializedRows, RowHandle, SqliteBackend,
    SqliteConfig,
};
pub use changes::{ChangeOrigin, Changes};
pub use engine::{
    ImmediateScheduler, Job, PendingOperation, PreparedOperation, Scheduler, ThreadScheduler,
    TokioScheduler,
};
pub use error::{BoxError, StoreError, StoreResult};
pub use live::LiveQuery;
pub use location::{locations, StorageLocation};
pub use logging::{default_log_level, init_logging, logging_status, LogConfig};
pub use mapping::{
    DefaultDeleteResolver, DefaultGetResolver, DefaultPutResolver, RowMapper, TypeMapping,
    TypeMappingRegistry,
};
pub use notifier::{ChangeNotifier, Subscription};
pub use operations::delete::{
    DeleteResolver, DeleteResult, DeleteResults, PreparedDelete, PreparedDeleteByQuery,
    PreparedDeleteCollection, QueryDeleteResolver,
};
pub use operations::execute_sql::PreparedExecuteSql;
pub use operations::get::{
    query_rows, GetKind, GetResolver, ListOf, NumberOfResults, ObjectOf, PreparedGet,
    PreparedGetListOfObjects, PreparedGetNumberOfResults, PreparedGetObject, PreparedGetRows,
    Rows, RowsGetResolver,
};
pub use operations::put::{
    InsertRowPutResolver, PreparedPut, PreparedPutCollection, PutResolver, PutResult, PutResults,
};
pub use query::{DeleteQuery, Filter, GetQuery, Limit, Query, RawQuery, UpdateQuery};
pub use row::{Row, RowError};
pub use store::{Store, StoreBuilder};
pub use tokio_util::sync::CancellationToken;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
