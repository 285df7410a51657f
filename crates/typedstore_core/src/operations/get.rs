//! Get operations.
//!
//! # Responsibility
//! - Stage get construction: result kind, then query, then optional resolver.
//! - Execute reads with guaranteed row-handle release.
//!
//! # Invariants
//! - The row handle is closed exactly once per execution, including when
//!   mapping fails.
//! - A prepared get without a query fails with a configuration error and never
//!   reaches the backend.

use crate::backend::{BackendResult, RowHandle};
use crate::engine::{
    check_cancelled, logged, map_rows, resolve_get, PreparedOperation, ScopedRows,
};
use crate::error::{BoxError, StoreError, StoreResult};
use crate::live::LiveQuery;
use crate::query::GetQuery;
use crate::row::Row;
use crate::store::Store;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Opens rows for a query and maps each row to `T`.
///
/// The handle returned by `perform_get` is owned by the caller, which closes it.
pub trait GetResolver<T>: Send + Sync {
    fn perform_get(&self, store: &Store, query: &GetQuery)
        -> Result<Box<dyn RowHandle>, BoxError>;

    fn map_from_row(&self, row: &Row) -> Result<T, BoxError>;
}

impl<T, R> GetResolver<T> for Arc<R>
where
    R: GetResolver<T> + ?Sized,
{
    fn perform_get(
        &self,
        store: &Store,
        query: &GetQuery,
    ) -> Result<Box<dyn RowHandle>, BoxError> {
        (**self).perform_get(store, query)
    }

    fn map_from_row(&self, row: &Row) -> Result<T, BoxError> {
        (**self).map_from_row(row)
    }
}

/// Runs `query` against the store's backend.
pub fn query_rows(store: &Store, query: &GetQuery) -> BackendResult<Box<dyn RowHandle>> {
    match query {
        GetQuery::Structured(query) => store.backend().query(query),
        GetQuery::Raw(query) => store.backend().raw_query(query),
    }
}

/// Identity resolver for raw rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowsGetResolver;

impl GetResolver<Row> for RowsGetResolver {
    fn perform_get(
        &self,
        store: &Store,
        query: &GetQuery,
    ) -> Result<Box<dyn RowHandle>, BoxError> {
        Ok(query_rows(store, query)?)
    }

    fn map_from_row(&self, row: &Row) -> Result<Row, BoxError> {
        Ok(row.clone())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Result shape of a get: what rows map to and how they are collected.
pub trait GetKind: sealed::Sealed + Send + Sync + 'static {
    type Item: 'static;
    type Output: Send + 'static;

    const OPERATION: &'static str;

    fn resolve(
        store: &Store,
        explicit: Option<&Arc<dyn GetResolver<Self::Item>>>,
    ) -> StoreResult<Arc<dyn GetResolver<Self::Item>>>;

    fn collect(
        rows: &mut dyn RowHandle,
        resolver: &dyn GetResolver<Self::Item>,
    ) -> Result<Self::Output, BoxError>;
}

/// Raw rows.
#[derive(Debug, Clone, Copy)]
pub struct Rows;

/// Every row mapped to `T`.
pub struct ListOf<T>(PhantomData<fn() -> T>);

/// First row mapped to `T`, if any.
pub struct ObjectOf<T>(PhantomData<fn() -> T>);

/// Row count only; rows are never mapped.
#[derive(Debug, Clone, Copy)]
pub struct NumberOfResults;

impl sealed::Sealed for Rows {}
impl<T> sealed::Sealed for ListOf<T> {}
impl<T> sealed::Sealed for ObjectOf<T> {}
impl sealed::Sealed for NumberOfResults {}

fn rows_resolver(
    explicit: Option<&Arc<dyn GetResolver<Row>>>,
) -> StoreResult<Arc<dyn GetResolver<Row>>> {
    Ok(match explicit {
        Some(resolver) => Arc::clone(resolver),
        None => Arc::new(RowsGetResolver),
    })
}

impl GetKind for Rows {
    type Item = Row;
    type Output = Vec<Row>;

    const OPERATION: &'static str = "get_rows";

    fn resolve(
        _store: &Store,
        explicit: Option<&Arc<dyn GetResolver<Row>>>,
    ) -> StoreResult<Arc<dyn GetResolver<Row>>> {
        rows_resolver(explicit)
    }

    fn collect(
        rows: &mut dyn RowHandle,
        resolver: &dyn GetResolver<Row>,
    ) -> Result<Vec<Row>, BoxError> {
        map_rows(rows, |row| resolver.map_from_row(row))
    }
}

impl<T: Send + 'static> GetKind for ListOf<T> {
    type Item = T;
    type Output = Vec<T>;

    const OPERATION: &'static str = "get_list";

    fn resolve(
        store: &Store,
        explicit: Option<&Arc<dyn GetResolver<T>>>,
    ) -> StoreResult<Arc<dyn GetResolver<T>>> {
        resolve_get(store, explicit)
    }

    fn collect(
        rows: &mut dyn RowHandle,
        resolver: &dyn GetResolver<T>,
    ) -> Result<Vec<T>, BoxError> {
        map_rows(rows, |row| resolver.map_from_row(row))
    }
}

impl<T: Send + 'static> GetKind for ObjectOf<T> {
    type Item = T;
    type Output = Option<T>;

    const OPERATION: &'static str = "get_object";

    fn resolve(
        store: &Store,
        explicit: Option<&Arc<dyn GetResolver<T>>>,
    ) -> StoreResult<Arc<dyn GetResolver<T>>> {
        resolve_get(store, explicit)
    }

    fn collect(
        rows: &mut dyn RowHandle,
        resolver: &dyn GetResolver<T>,
    ) -> Result<Option<T>, BoxError> {
        if rows.count() == 0 {
            return Ok(None);
        }
        rows.next_row()
            .map(|row| resolver.map_from_row(&row))
            .transpose()
    }
}

impl GetKind for NumberOfResults {
    type Item = Row;
    type Output = usize;

    const OPERATION: &'static str = "get_count";

    fn resolve(
        _store: &Store,
        explicit: Option<&Arc<dyn GetResolver<Row>>>,
    ) -> StoreResult<Arc<dyn GetResolver<Row>>> {
        rows_resolver(explicit)
    }

    fn collect(
        rows: &mut dyn RowHandle,
        _resolver: &dyn GetResolver<Row>,
    ) -> Result<usize, BoxError> {
        Ok(rows.count())
    }
}

/// Entry point returned by `Store::get`.
pub struct GetBuilder {
    store: Store,
}

impl GetBuilder {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn rows(self) -> GetQueryStage<Rows> {
        GetQueryStage::new(self.store)
    }

    pub fn list_of_objects<T: Send + 'static>(self) -> GetQueryStage<ListOf<T>> {
        GetQueryStage::new(self.store)
    }

    pub fn object<T: Send + 'static>(self) -> GetQueryStage<ObjectOf<T>> {
        GetQueryStage::new(self.store)
    }

    pub fn number_of_results(self) -> GetQueryStage<NumberOfResults> {
        GetQueryStage::new(self.store)
    }
}

/// Get builder still waiting for its query.
pub struct GetQueryStage<K: GetKind> {
    store: Store,
    resolver: Option<Arc<dyn GetResolver<K::Item>>>,
}

impl<K: GetKind> GetQueryStage<K> {
    fn new(store: Store) -> Self {
        Self {
            store,
            resolver: None,
        }
    }

    pub fn with_get_resolver(mut self, resolver: impl GetResolver<K::Item> + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_query(self, query: impl Into<GetQuery>) -> CompleteGetBuilder<K> {
        CompleteGetBuilder {
            store: self.store,
            query: query.into(),
            resolver: self.resolver,
        }
    }
}

pub struct CompleteGetBuilder<K: GetKind> {
    store: Store,
    query: GetQuery,
    resolver: Option<Arc<dyn GetResolver<K::Item>>>,
}

impl<K: GetKind> CompleteGetBuilder<K> {
    pub fn with_get_resolver(mut self, resolver: impl GetResolver<K::Item> + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn prepare(self) -> PreparedGet<K> {
        PreparedGet::new(self.store, Some(self.query), self.resolver)
    }
}

/// Prepared read producing `K::Output`.
pub struct PreparedGet<K: GetKind> {
    store: Store,
    query: Option<GetQuery>,
    resolver: Option<Arc<dyn GetResolver<K::Item>>>,
    _kind: PhantomData<fn() -> K>,
}

pub type PreparedGetRows = PreparedGet<Rows>;
pub type PreparedGetListOfObjects<T> = PreparedGet<ListOf<T>>;
pub type PreparedGetObject<T> = PreparedGet<ObjectOf<T>>;
pub type PreparedGetNumberOfResults = PreparedGet<NumberOfResults>;

impl<K: GetKind> Clone for PreparedGet<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            query: self.query.clone(),
            resolver: self.resolver.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: GetKind> PreparedGet<K> {
    /// Unchecked construction; a missing query is reported at execution.
    pub fn new(
        store: Store,
        query: Option<GetQuery>,
        resolver: Option<Arc<dyn GetResolver<K::Item>>>,
    ) -> Self {
        Self {
            store,
            query,
            resolver,
            _kind: PhantomData,
        }
    }

    pub fn query(&self) -> Option<&GetQuery> {
        self.query.as_ref()
    }

    /// Live view of this read: first result now, a fresh one after every
    /// change to the observed locations.
    pub fn observe(&self) -> StoreResult<LiveQuery<K>> {
        let query = self.require_query()?;
        let locations = query.observed_locations();
        let subscription =
            (!locations.is_empty()).then(|| self.store.observe_changes_in(locations));
        Ok(LiveQuery::new(self.clone(), subscription))
    }

    fn require_query(&self) -> StoreResult<&GetQuery> {
        self.query
            .as_ref()
            .ok_or_else(|| StoreError::configuration("Please specify query"))
    }

    fn run(&self, cancel: &CancellationToken) -> StoreResult<K::Output> {
        let query = self.require_query()?;
        let resolver = K::resolve(&self.store, self.resolver.as_ref())?;
        check_cancelled(cancel)?;

        let handle = resolver
            .perform_get(&self.store, query)
            .map_err(|cause| StoreError::execution(K::OPERATION, cause))?;
        let mut rows = ScopedRows::new(handle);
        let output = K::collect(rows.handle_mut(), &*resolver)
            .map_err(|cause| StoreError::execution(K::OPERATION, cause))?;
        rows.close();
        Ok(output)
    }
}

impl<K: GetKind> PreparedOperation for PreparedGet<K> {
    type Output = K::Output;

    fn store(&self) -> &Store {
        &self.store
    }

    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<K::Output> {
        logged(K::OPERATION, 1, Instant::now(), self.run(cancel))
    }
}
