//! Execution engine shared by every prepared operation.
//!
//! # Responsibility
//! - Resolve resolvers (explicit first, registry second) before any I/O.
//! - Run collections with scoped transaction handling.
//! - Publish one `Changes` per successful mutating invocation.
//! - Release row handles exactly once, on every path.
//!
//! # Invariants
//! - Resolution failure returns before the backend sees a single call.
//! - A transaction begun here is always ended here.
//! - Failures are wrapped into `StoreError` only at this boundary.
//!
//! # See also
//! - `scheduler` / `pending` for asynchronous execution.

use crate::backend::{Backend, BackendResult, RowHandle};
use crate::changes::{ChangeOrigin, Changes};
use crate::error::{BoxError, StoreError, StoreResult};
use crate::location::StorageLocation;
use crate::operations::delete::DeleteResolver;
use crate::operations::get::GetResolver;
use crate::operations::put::PutResolver;
use crate::row::Row;
use crate::store::Store;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod pending;
pub mod scheduler;

pub use pending::PendingOperation;
pub use scheduler::{ImmediateScheduler, Job, Scheduler, ThreadScheduler, TokioScheduler};

/// Immutable, re-executable operation.
///
/// Every call re-runs the operation against the backend; nothing is cached.
pub trait PreparedOperation: Clone + Send + 'static {
    type Output: Send + 'static;

    fn store(&self) -> &Store;

    /// Runs on the caller's thread, checking `cancel` between units of work.
    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<Self::Output>;

    /// Runs on the caller's thread.
    fn execute(&self) -> StoreResult<Self::Output> {
        self.execute_cancellable(&CancellationToken::new())
    }

    /// Runs on the store's scheduler.
    fn execute_async(&self) -> PendingOperation<Self::Output> {
        let scheduler = Arc::clone(self.store().scheduler());
        self.execute_on(scheduler.as_ref())
    }

    fn execute_on(&self, scheduler: &dyn Scheduler) -> PendingOperation<Self::Output> {
        PendingOperation::schedule(scheduler, self.clone())
    }
}

/// Result kinds that report which locations they changed.
pub(crate) trait ChangedLocations {
    /// `None` when nothing was written.
    fn changed_locations(&self) -> Option<&BTreeSet<StorageLocation>>;
}

pub(crate) fn resolve_put<T: 'static>(
    store: &Store,
    explicit: Option<&Arc<dyn PutResolver<T>>>,
) -> StoreResult<Arc<dyn PutResolver<T>>> {
    if let Some(resolver) = explicit {
        return Ok(Arc::clone(resolver));
    }
    store
        .type_mapping::<T>()
        .map(|mapping| Arc::clone(mapping.put_resolver()))
        .ok_or_else(missing_mapping::<T>)
}

pub(crate) fn resolve_get<T: 'static>(
    store: &Store,
    explicit: Option<&Arc<dyn GetResolver<T>>>,
) -> StoreResult<Arc<dyn GetResolver<T>>> {
    if let Some(resolver) = explicit {
        return Ok(Arc::clone(resolver));
    }
    store
        .type_mapping::<T>()
        .map(|mapping| Arc::clone(mapping.get_resolver()))
        .ok_or_else(missing_mapping::<T>)
}

pub(crate) fn resolve_delete<T: 'static>(
    store: &Store,
    explicit: Option<&Arc<dyn DeleteResolver<T>>>,
) -> StoreResult<Arc<dyn DeleteResolver<T>>> {
    if let Some(resolver) = explicit {
        return Ok(Arc::clone(resolver));
    }
    store
        .type_mapping::<T>()
        .map(|mapping| Arc::clone(mapping.delete_resolver()))
        .ok_or_else(missing_mapping::<T>)
}

fn missing_mapping<T: 'static>() -> StoreError {
    let err = StoreError::no_type_mapping::<T>();
    warn!(
        "event=type_mapping module=engine status=error error_code={} type={}",
        err.code(),
        std::any::type_name::<T>()
    );
    err
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> StoreResult<()> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Publishes the union of `locations`; nothing when the union is empty.
pub(crate) fn publish_changes<'a, I>(store: &Store, origin: ChangeOrigin, locations: I)
where
    I: IntoIterator<Item = &'a BTreeSet<StorageLocation>>,
{
    let merged: BTreeSet<StorageLocation> = locations.into_iter().flatten().cloned().collect();
    if merged.is_empty() {
        return;
    }
    store
        .notifier()
        .publish(Changes::new(merged).with_origin(origin));
}

/// Logs the outcome of one engine invocation and passes it through.
pub(crate) fn logged<T>(
    operation: &'static str,
    items: usize,
    started: Instant,
    result: StoreResult<T>,
) -> StoreResult<T> {
    let duration_ms = started.elapsed().as_millis();
    match &result {
        Ok(_) => debug!(
            "event=operation_execute module=engine status=ok operation={operation} items={items} duration_ms={duration_ms}"
        ),
        Err(StoreError::Cancelled) => debug!(
            "event=operation_execute module=engine status=cancelled operation={operation} items={items} duration_ms={duration_ms}"
        ),
        Err(err) => warn!(
            "event=operation_execute module=engine status=error operation={operation} items={items} duration_ms={duration_ms} error_code={} error={err}",
            err.code()
        ),
    }
    result
}

/// Per-item loop for collection put/delete.
///
/// With `use_transaction` the whole loop runs inside one backend transaction
/// that is marked successful only when every item succeeded; otherwise the
/// first failure aborts the loop and locations of items already written are
/// still published. The returned error does not carry those partial results.
pub(crate) fn run_collection<T, R, F>(
    store: &Store,
    operation: &'static str,
    origin: ChangeOrigin,
    items: &[T],
    use_transaction: bool,
    cancel: &CancellationToken,
    mut perform: F,
) -> StoreResult<Vec<(T, R)>>
where
    T: Clone,
    R: ChangedLocations,
    F: FnMut(&T) -> Result<R, BoxError>,
{
    check_cancelled(cancel)?;
    let mut results = Vec::with_capacity(items.len());

    if use_transaction {
        let transaction = TransactionGuard::begin(store.backend())
            .map_err(|err| StoreError::execution(operation, err))?;
        let outcome = perform_each(operation, items, cancel, &mut perform, &mut results)
            .and_then(|()| {
                transaction
                    .set_successful()
                    .map_err(|err| StoreError::execution(operation, err))
            });
        let ended = transaction.end();

        match (outcome, ended) {
            (Ok(()), Ok(())) => {}
            (Ok(()), Err(err)) => return Err(StoreError::execution(operation, err)),
            (Err(err), Ok(())) => return Err(err),
            (Err(err), Err(end_err)) => {
                warn!(
                    "event=transaction module=engine status=error phase=end operation={operation} error={end_err}"
                );
                return Err(err);
            }
        }
    } else if let Err(err) = perform_each(operation, items, cancel, &mut perform, &mut results) {
        publish_changes(
            store,
            origin,
            results.iter().filter_map(|(_, result)| result.changed_locations()),
        );
        return Err(err);
    }

    publish_changes(
        store,
        origin,
        results.iter().filter_map(|(_, result)| result.changed_locations()),
    );
    Ok(results)
}

fn perform_each<T, R, F>(
    operation: &'static str,
    items: &[T],
    cancel: &CancellationToken,
    perform: &mut F,
    results: &mut Vec<(T, R)>,
) -> StoreResult<()>
where
    T: Clone,
    F: FnMut(&T) -> Result<R, BoxError>,
{
    for item in items {
        check_cancelled(cancel)?;
        let result = perform(item).map_err(|cause| StoreError::execution(operation, cause))?;
        results.push((item.clone(), result));
    }
    Ok(())
}

/// Ends the transaction on drop unless [`TransactionGuard::end`] already did.
pub(crate) struct TransactionGuard<'a> {
    backend: &'a dyn Backend,
    ended: bool,
}

impl<'a> TransactionGuard<'a> {
    pub(crate) fn begin(backend: &'a dyn Backend) -> BackendResult<Self> {
        backend.begin_transaction()?;
        debug!("event=transaction module=engine status=start");
        Ok(Self {
            backend,
            ended: false,
        })
    }

    pub(crate) fn set_successful(&self) -> BackendResult<()> {
        self.backend.set_transaction_successful()
    }

    pub(crate) fn end(mut self) -> BackendResult<()> {
        self.ended = true;
        let ended = self.backend.end_transaction();
        debug!(
            "event=transaction module=engine status={}",
            if ended.is_ok() { "ok" } else { "error" }
        );
        ended
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(err) = self.backend.end_transaction() {
            warn!("event=transaction module=engine status=error phase=unwind error={err}");
        }
    }
}

/// Owns a row handle and closes it exactly once.
pub(crate) struct ScopedRows {
    handle: Box<dyn RowHandle>,
    closed: bool,
}

impl ScopedRows {
    pub(crate) fn new(handle: Box<dyn RowHandle>) -> Self {
        Self {
            handle,
            closed: false,
        }
    }

    pub(crate) fn handle_mut(&mut self) -> &mut dyn RowHandle {
        self.handle.as_mut()
    }

    pub(crate) fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.handle.close();
        }
    }
}

impl Drop for ScopedRows {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drains `rows`, mapping each one.
pub(crate) fn map_rows<T>(
    rows: &mut dyn RowHandle,
    mut map: impl FnMut(&Row) -> Result<T, BoxError>,
) -> Result<Vec<T>, BoxError> {
    let mut mapped = Vec::with_capacity(rows.count());
    while let Some(row) = rows.next_row() {
        mapped.push(map(&row)?);
    }
    Ok(mapped)
}
