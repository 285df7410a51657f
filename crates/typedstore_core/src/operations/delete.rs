//! Delete operations: by object, by object collection, or by query.

use crate::changes::ChangeOrigin;
use crate::engine::{
    check_cancelled, logged, publish_changes, resolve_delete, run_collection, ChangedLocations,
    PreparedOperation,
};
use crate::error::{BoxError, StoreError, StoreResult};
use crate::location::StorageLocation;
use crate::query::DeleteQuery;
use crate::store::Store;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deletes the stored representation of one object.
pub trait DeleteResolver<T>: Send + Sync {
    fn perform_delete(&self, store: &Store, object: &T) -> Result<DeleteResult, BoxError>;
}

impl<T, R> DeleteResolver<T> for Arc<R>
where
    R: DeleteResolver<T> + ?Sized,
{
    fn perform_delete(&self, store: &Store, object: &T) -> Result<DeleteResult, BoxError> {
        (**self).perform_delete(store, object)
    }
}

/// Outcome of one delete. Zero rows deleted is a `Deleted` value, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeleteResult {
    Deleted {
        rows_affected: usize,
        locations: BTreeSet<StorageLocation>,
    },
    /// The resolver gave up without touching storage.
    Failed {
        locations: BTreeSet<StorageLocation>,
    },
}

impl DeleteResult {
    pub fn deleted(rows_affected: usize, location: impl Into<StorageLocation>) -> Self {
        Self::Deleted {
            rows_affected,
            locations: BTreeSet::from([location.into()]),
        }
    }

    pub fn failed(location: impl Into<StorageLocation>) -> Self {
        Self::Failed {
            locations: BTreeSet::from([location.into()]),
        }
    }

    pub fn also_affecting(mut self, location: impl Into<StorageLocation>) -> Self {
        match &mut self {
            Self::Deleted { locations, .. } | Self::Failed { locations } => {
                locations.insert(location.into());
            }
        }
        self
    }

    pub fn rows_deleted(&self) -> usize {
        match self {
            Self::Deleted { rows_affected, .. } => *rows_affected,
            Self::Failed { .. } => 0,
        }
    }

    pub fn locations(&self) -> &BTreeSet<StorageLocation> {
        match self {
            Self::Deleted { locations, .. } | Self::Failed { locations } => locations,
        }
    }
}

impl ChangedLocations for DeleteResult {
    fn changed_locations(&self) -> Option<&BTreeSet<StorageLocation>> {
        (self.rows_deleted() > 0).then(|| self.locations())
    }
}

/// Per-object results of a collection delete, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResults<T> {
    results: Vec<(T, DeleteResult)>,
}

impl<T> DeleteResults<T> {
    pub fn new(results: Vec<(T, DeleteResult)>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[(T, DeleteResult)] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(T, DeleteResult)> {
        self.results.iter()
    }

    pub fn total_rows_deleted(&self) -> usize {
        self.results.iter().map(|(_, r)| r.rows_deleted()).sum()
    }

    pub fn into_inner(self) -> Vec<(T, DeleteResult)> {
        self.results
    }
}

impl<T: PartialEq> DeleteResults<T> {
    pub fn result_for(&self, object: &T) -> Option<&DeleteResult> {
        self.results
            .iter()
            .find(|(candidate, _)| candidate == object)
            .map(|(_, result)| result)
    }
}

impl<T> IntoIterator for DeleteResults<T> {
    type Item = (T, DeleteResult);
    type IntoIter = std::vec::IntoIter<(T, DeleteResult)>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Deletes whatever the query matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryDeleteResolver;

impl DeleteResolver<DeleteQuery> for QueryDeleteResolver {
    fn perform_delete(&self, store: &Store, query: &DeleteQuery) -> Result<DeleteResult, BoxError> {
        let deleted = store.backend().delete(query)?;
        Ok(DeleteResult::deleted(deleted, query.location().clone()))
    }
}

/// Entry point returned by `Store::delete`.
pub struct DeleteBuilder {
    store: Store,
}

impl DeleteBuilder {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn object<T>(self, object: T) -> PreparedDeleteBuilder<T>
    where
        T: Send + Sync + 'static,
    {
        PreparedDeleteBuilder {
            store: self.store,
            object: Arc::new(object),
            resolver: None,
        }
    }

    pub fn objects<T, I>(self, objects: I) -> PreparedDeleteCollectionBuilder<T>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        PreparedDeleteCollectionBuilder {
            store: self.store,
            objects: objects.into_iter().collect(),
            resolver: None,
            use_transaction: true,
        }
    }

    pub fn by_query(self, query: DeleteQuery) -> PreparedDeleteBuilder<DeleteQuery> {
        PreparedDeleteBuilder {
            store: self.store,
            object: Arc::new(query),
            resolver: Some(Arc::new(QueryDeleteResolver)),
        }
    }
}

pub struct PreparedDeleteBuilder<T> {
    store: Store,
    object: Arc<T>,
    resolver: Option<Arc<dyn DeleteResolver<T>>>,
}

impl<T: Send + Sync + 'static> PreparedDeleteBuilder<T> {
    pub fn with_delete_resolver(mut self, resolver: impl DeleteResolver<T> + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn prepare(self) -> PreparedDelete<T> {
        PreparedDelete {
            store: self.store,
            object: self.object,
            resolver: self.resolver,
        }
    }
}

pub struct PreparedDeleteCollectionBuilder<T> {
    store: Store,
    objects: Vec<T>,
    resolver: Option<Arc<dyn DeleteResolver<T>>>,
    use_transaction: bool,
}

impl<T: Clone + Send + Sync + 'static> PreparedDeleteCollectionBuilder<T> {
    pub fn with_delete_resolver(mut self, resolver: impl DeleteResolver<T> + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Defaults to `true`.
    ///
    /// With `false` the first failing item stops the collection. Items already
    /// deleted stay deleted and their locations are still published to
    /// observers, but the returned [`StoreError`] carries only the failure.
    pub fn use_transaction(mut self, use_transaction: bool) -> Self {
        self.use_transaction = use_transaction;
        self
    }

    pub fn prepare(self) -> PreparedDeleteCollection<T> {
        PreparedDeleteCollection {
            store: self.store,
            objects: Arc::from(self.objects),
            resolver: self.resolver,
            use_transaction: self.use_transaction,
        }
    }
}

/// Prepared delete of one object, or of a query's matches.
pub struct PreparedDelete<T> {
    store: Store,
    object: Arc<T>,
    resolver: Option<Arc<dyn DeleteResolver<T>>>,
}

pub type PreparedDeleteByQuery = PreparedDelete<DeleteQuery>;

impl<T> Clone for PreparedDelete<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            object: Arc::clone(&self.object),
            resolver: self.resolver.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> PreparedDelete<T> {
    pub fn object(&self) -> &T {
        &self.object
    }

    fn run(&self, cancel: &CancellationToken) -> StoreResult<DeleteResult> {
        let resolver = resolve_delete(&self.store, self.resolver.as_ref())?;
        check_cancelled(cancel)?;

        let result = resolver
            .perform_delete(&self.store, self.object.as_ref())
            .map_err(|cause| StoreError::execution("delete", cause))?;
        publish_changes(
            &self.store,
            ChangeOrigin::for_type::<T>("delete"),
            result.changed_locations(),
        );
        Ok(result)
    }
}

impl<T: Send + Sync + 'static> PreparedOperation for PreparedDelete<T> {
    type Output = DeleteResult;

    fn store(&self) -> &Store {
        &self.store
    }

    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<DeleteResult> {
        logged("delete", 1, Instant::now(), self.run(cancel))
    }
}

/// Prepared delete of several objects.
pub struct PreparedDeleteCollection<T> {
    store: Store,
    objects: Arc<[T]>,
    resolver: Option<Arc<dyn DeleteResolver<T>>>,
    use_transaction: bool,
}

impl<T> Clone for PreparedDeleteCollection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            objects: Arc::clone(&self.objects),
            resolver: self.resolver.clone(),
            use_transaction: self.use_transaction,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> PreparedDeleteCollection<T> {
    pub fn objects(&self) -> &[T] {
        &self.objects
    }

    pub fn uses_transaction(&self) -> bool {
        self.use_transaction
    }

    fn run(&self, cancel: &CancellationToken) -> StoreResult<DeleteResults<T>> {
        let resolver = resolve_delete(&self.store, self.resolver.as_ref())?;
        let results = run_collection(
            &self.store,
            "delete",
            ChangeOrigin::for_type::<T>("delete"),
            &self.objects[..],
            self.use_transaction,
            cancel,
            |object| resolver.perform_delete(&self.store, object),
        )?;
        Ok(DeleteResults::new(results))
    }
}

impl<T: Clone + Send + Sync + 'static> PreparedOperation for PreparedDeleteCollection<T> {
    type Output = DeleteResults<T>;

    fn store(&self) -> &Store {
        &self.store
    }

    fn execute_cancellable(&self, cancel: &CancellationToken) -> StoreResult<DeleteResults<T>> {
        let started = Instant::now();
        logged("delete", self.objects.len(), started, self.run(cancel))
    }
}
