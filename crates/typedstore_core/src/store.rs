//! Store facade: backend, frozen type mappings, notifier and scheduler.
//!
//! # Responsibility
//! - Hand out operation builders bound to one backend.
//! - Own the change notifier used for publishing and observation.
//!
//! # Invariants
//! - The type-mapping registry is frozen when the store is built; lookups
//!   take no lock.
//! - Clones share all state.

use crate::backend::Backend;
use crate::engine::{Scheduler, ThreadScheduler};
use crate::error::{StoreError, StoreResult};
use crate::location::StorageLocation;
use crate::mapping::{TypeMapping, TypeMappingRegistry};
use crate::notifier::{ChangeNotifier, Subscription};
use crate::operations::delete::DeleteBuilder;
use crate::operations::execute_sql::ExecuteSqlBuilder;
use crate::operations::get::GetBuilder;
use crate::operations::put::PutBuilder;
use log::info;
use std::sync::Arc;

/// Cheaply cloneable handle to one configured store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn Backend>,
    registry: TypeMappingRegistry,
    notifier: ChangeNotifier,
    scheduler: Arc<dyn Scheduler>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub fn type_mapping<T: 'static>(&self) -> Option<TypeMapping<T>> {
        self.inner.registry.lookup::<T>()
    }

    pub fn registry(&self) -> &TypeMappingRegistry {
        &self.inner.registry
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.inner.notifier
    }

    /// Scheduler used by `execute_async`.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn put(&self) -> PutBuilder {
        PutBuilder::new(self.clone())
    }

    pub fn get(&self) -> GetBuilder {
        GetBuilder::new(self.clone())
    }

    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::new(self.clone())
    }

    pub fn execute_sql(&self) -> ExecuteSqlBuilder {
        ExecuteSqlBuilder::new(self.clone())
    }

    /// Changes touching any of `locations`.
    pub fn observe_changes_in<I, L>(&self, locations: I) -> Subscription
    where
        I: IntoIterator<Item = L>,
        L: Into<StorageLocation>,
    {
        self.inner.notifier.observe(locations)
    }

    /// Every change published through this store's notifier.
    pub fn observe_changes(&self) -> Subscription {
        self.inner.notifier.observe_all()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("registry", &self.inner.registry)
            .field("subscribers", &self.inner.notifier.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Collects store configuration; `build` requires a backend.
#[derive(Default)]
pub struct StoreBuilder {
    backend: Option<Arc<dyn Backend>>,
    registry: TypeMappingRegistry,
    notifier: Option<ChangeNotifier>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl StoreBuilder {
    pub fn backend(self, backend: impl Backend + 'static) -> Self {
        self.shared_backend(Arc::new(backend))
    }

    /// Uses a backend the caller keeps a handle to.
    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replaces every mapping added so far.
    pub fn registry(mut self, registry: TypeMappingRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn add_type_mapping<T: 'static>(mut self, mapping: TypeMapping<T>) -> StoreResult<Self> {
        self.registry.register(mapping)?;
        Ok(self)
    }

    /// Shares a notifier with other stores or external change sources.
    pub fn notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> StoreResult<Store> {
        let backend = self
            .backend
            .ok_or_else(|| StoreError::configuration("Please specify backend"))?;

        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(ThreadScheduler::default()),
        };

        info!(
            "event=store_build module=store status=ok type_mappings={}",
            self.registry.len()
        );
        Ok(Store {
            inner: Arc::new(StoreInner {
                backend,
                registry: self.registry,
                notifier: self.notifier.unwrap_or_default(),
                scheduler,
            }),
        })
    }
}
