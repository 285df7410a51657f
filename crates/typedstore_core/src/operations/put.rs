//! Put operations: builders, prepared operations, results and resolvers.

use crate::changes::ChangeOrigin;
use crate::engine::{
    check_cancelled, logged, publish_changes, resolve_put, run_collection, ChangedLocations,
    PreparedOperation,
};
use crate::error::{BoxError, StoreError, StoreResult};
use crate::location::StorageLocation;
use crate::mapping::mapper::insert_row;
use crate::row::Row;
use crate::store::Store;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Writes one object (insert or update) and reports what happened.
pub trait PutResolver<T>: Send + Sync {
    fn perform_put(&self, store: &Store, object: &T) -> Result<PutResult, BoxError>;
}

impl<T, R> PutResolver<T> for Arc<R>
where
    R: PutResolver<T> + ?Sized,
{
    fn perform_put(&self, store: &Store, object: &T) -> Result<PutResult, BoxError> {
        (**self).perform_put(store, object)
    }
}

/// Outcome of one put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PutResult {
    Inserted {
        id: i64,
        locations: BTreeSet<StorageLocation>,
    },
    Updated {
        rows_affected: usize,
        locations: BTreeSet<StorageLocation>,
    },
    /// The backend accepted the call but wrote no row.
    Failed {
        locations: BTreeSet<StorageLocation>,
    },
}

impl PutResult {
    pub fn inserted(id: i64, location: impl Into<StorageLocation>) -> Self {
        Self::Inserted {
            id,
            locations: BTreeSet::from([location.into()]),
        }
    }

    pub fn updated(rows_affected: usize, location: impl Into<StorageLocation>) -> Self {
        Self::Updated {
            rows_affected,
            locations: BTreeSet::from([location.into()]),
        }
    }

    pub fn failed(location: impl Into<StorageLocation>) -> Self {
        Self::Failed {
            locations: BTreeSet::from([location.into()]),
        }
    }

    /// Adds a location that the same write also touched.
    pub fn also_affecting(mut self, location: impl Into<StorageLocation>) -> Self {
        match &mut self {
            Self::Inserted { locations, .. }
            | Self::Updated { locations, .. }
            | Self::Failed { locations } => {
                locations.insert(location.into());
            }
        }
        self
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    /// True only when at least one row was updated.
    pub fn was_updated(&self) -> bool {
        matches!(self, Self::Updated { rows_affected, .. } if *rows_affected > 0)
    }

    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            Self::Inserted { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn rows_updated(&self) -> Option<usize> {
        match self {
            Self::Updated { rows_affected, .. } => Some(*rows_affected),
            _ => None,
        }
    }

    pub fn locations(&self) -> &BTreeSet<StorageLocation> {
        match self {
            Self::Inserted { locations, .. }
            | Self::Updated { locations, .. }
            | Self::Failed { locations } => locations,
        }
    }
}

impl ChangedLocations for PutResult {
    fn changed_locations(&self) -> Option<&BTreeSet<StorageLocation>> {
        (self.was_inserted() || self.was_updated()).then(|| self.locations())
    }
}

/// Per-object results of a collection put, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PutResults<T> {
    results: Vec<(T, PutResult)>,
}

impl<T> PutResults<T> {
    pub fn new(results: Vec<(T, PutResult)>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[(T, PutResult)] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(T, PutResult)> {
        self.results.iter()
    }

    pub fn number_of_inserts(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.was_inserted()).count()
    }

    pub fn number_of_updates(&self) -> usize {
        self.results
            .iter()
            .filter_map(|(_, r)| r.rows_updated())
            .sum()
    }

    pub fn into_inner(self) -> Vec<(T, PutResult)> {
        self.results
    }
}

impl<T: PartialEq> PutResults<T> {
    pub fn result_for(&self, object: &T) -> Option<&PutResult> {
        self.results
            .iter()
            .find(|(candidate, _)| candidate == object)
            .map(|(_, result)| result)
    }
}

impl<T> IntoIterator for PutResults<T> {
    type Item = (T, PutResult);
    type IntoIter = std::vec::IntoIter<(T, PutResult)>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Inserts raw rows into one fixed location.
#[derive(Debug, Clone)]
pub struct InsertRowPutResolver {
    location: StorageLocation,
}

impl InsertRowPutResolver {
    pub fn new(location: impl Into<StorageLocation>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

impl PutResolver<Row> for InsertRowPutResolver {
    fn perform_put(&self, store: &Store, row: &Row) -> Result<PutResult, BoxError> {
        insert_row(store, self.location.clone(), row)
    }
}

/// Entry point returned by `Store::put`.
pub struct PutBuilder {
    store: Store,
}

impl PutBuilder {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn object<T>(self, object: T) -> PreparedPutBuilder<T>
    where
        T: Send + Sync + 'static,
    {
        PreparedPutBuilder {
            store: self.store,
            object: Arc::new(object),
            resolver: None,
        }
    }

    pub fn objects<T, I>(self, objects: I) -> PreparedPutCollectionBuilder<T>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        PreparedPutCollectionBuilder {
            store: self.store,
            objects: objects.into_iter().collect(),
            resolver: None,
            use_transaction: true,
        }
    }

    /// Raw row put; a resolver must be supplied before it can be prepared.
    pub fn row(self, row: Row) -> PutRowBuilder {
        PutRowBuilder {
            store: self.store,
            row,
        }
    }

    pub fn rows(self, rows: impl IntoIterator<Item = Row>) -> PutRowsBuilder {
        PutRowsBuilder {
            store: self.store,
            rows: rows.into_iter().collect(),
        }
    }
}

pub struct PutRowBuilder {
    store: Store,
    row: Row,
}

impl PutRowBuilder {
    pub fn with_put_resolver(
        self,
        resolver: impl PutResolver<Row> + 'static,
    ) -> PreparedPutBuilder<Row> {
        PreparedPutBuilder {
            store: self.store,
            object: Arc::new(self.row),
            resolver: Some(Arc::new(resolver)),
        }
    }
}

pub struct PutRowsBuilder {
    store: Store,
    rows: Vec<Row>,
}

impl PutRowsBuilder {
    pub fn with_put_resolver(
        self,
        resolver: impl PutResolver<Row> + 'static,
    ) -> PreparedPutCollectionBuilder<Row> {
        PreparedPutCollectionBuilder {
            store: self.store,
            objects: self.rows,
            resolver: Some(Arc::new(resolver)),
            use_transaction: true,
        }
    }
}

pub struct PreparedPutBuilder<T> {
    store: Store,
    object: Arc<T>,
    resolver: Option<Arc<dyn PutResolver<T>>>,
}

impl<T: Send + Sync + 'static> PreparedPutBuilder<T> {
    /// Overrides the registered mapping for this operation.
    pub fn with_put_resolver(mut self, resolver: impl PutResolver<T> + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn prepare(self) -> PreparedPut<T> {
        PreparedPut {
            store: self.store,
            object: self.object,
            resolver: self.resolver,
        }
    }
}

pub struct PreparedPutCollectionBuilder<T> {
    store: Store,
    objects: Vec<T>,
    resolver: Option<Arc<dyn PutResolver<T>>>,
    use_transaction: bool,
}

impl<T: Clone + Send + Sync + 'static> PreparedPutCollectionBuilder<T> {
    pub fn with_put_resolver(mut self, resolver: impl PutResolver<T> + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Defaults to `true`.
    ///
    /// With `false` the first failing item stops the collection. Items already
    /// written stay written and their locations are still published to
    /// observers, but the returned [`StoreError`] carries only the failure.
    pub fn use_transaction(mut self, use_transaction: bool) -> Self {
        self.use_transaction = use_transaction;
        self
    }

    pub fn prepare(self) -> PreparedPutCollection<T> {
        PreparedPutCollection {
            store: self.store,
            objects: Arc::from(self.objects),
            resolver: self.resolver,
            use_transaction: self.use_transaction,
        }
    }
}

/// Prepared put of one object or row.
pub struct PreparedPut<T> {
    store: Store,
    object: Arc<T>,
    resolver: Option<Arc<dyn PutResolver<T>>>,
}

impl<T> Clone for PreparedPut<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            object: Arc::clone(&self.object),
            resolver: self.resolver.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> PreparedPut<T> {
    pub fn object(&self) -> &T {
        &self.object
    }

    fn run(&self, cancel: &CancellationToken) -> StoreResult<PutResult> {
        let resolver = resolve_put(&self.store, self.resolver.as_ref())?;
        check_cancelled(cancel)?;

        let result = resolver
            .perform_put(&self.store, self.object.as_ref())
            .map_err(|cause| StoreError::execution("put", cause))?;
        publish_changes(
            &self.store,
            ChangeOrigin::for_type::<T>("put"),
            result.changed_locations(),
        );
        Ok(result)
    }
}

impl<T: Send + Sync + 'static> PreparedOperation for PreparedPut<T> {
    type Output = PutResult;

    fn store(&self) -> &Store {
        &self.store
    }

    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<PutResult> {
        logged("put", 1, Instant::now(), self.run(cancel))
    }
}

/// Prepared put of several objects or rows.
pub struct PreparedPutCollection<T> {
    store: Store,
    objects: Arc<[T]>,
    resolver: Option<Arc<dyn PutResolver<T>>>,
    use_transaction: bool,
}

impl<T> Clone for PreparedPutCollection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            objects: Arc::clone(&self.objects),
            resolver: self.resolver.clone(),
            use_transaction: self.use_transaction,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> PreparedPutCollection<T> {
    pub fn objects(&self) -> &[T] {
        &self.objects
    }

    pub fn uses_transaction(&self) -> bool {
        self.use_transaction
    }

    fn run(&self, cancel: &CancellationToken) -> StoreResult<PutResults<T>> {
        let resolver = resolve_put(&self.store, self.resolver.as_ref())?;
        let results = run_collection(
            &self.store,
            "put",
            ChangeOrigin::for_type::<T>("put"),
            &self.objects[..],
            self.use_transaction,
            cancel,
            |object| resolver.perform_put(&self.store, object),
        )?;
        Ok(PutResults::new(results))
    }
}

impl<T: Clone + Send + Sync + 'static> PreparedOperation for PreparedPutCollection<T> {
    type Output = PutResults<T>;

    fn store(&self) -> &Store {
        &self.store
    }

    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<PutResults<T>> {
        let started = Instant::now();
        logged("put", self.objects.len(), started, self.run(cancel))
    }
}
