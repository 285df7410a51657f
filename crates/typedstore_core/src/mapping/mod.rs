//! Per-type resolver bundles.
//!
//! # Responsibility
//! - Bundle the put/get/delete resolvers of one domain type.
//! - Offer a staged builder so a mapping can never miss a resolver.
//!
//! # Invariants
//! - A `TypeMapping<T>` is immutable once built; clones share resolvers.
//!
//! # See also
//! - `registry` for lookup by exact type.
//! - `mapper` for resolvers derived from a single [`RowMapper`].

use crate::operations::delete::DeleteResolver;
use crate::operations::get::GetResolver;
use crate::operations::put::PutResolver;
use std::sync::Arc;

pub mod mapper;
pub mod registry;

pub use mapper::{DefaultDeleteResolver, DefaultGetResolver, DefaultPutResolver, RowMapper};
pub use registry::TypeMappingRegistry;

/// Put/get/delete resolver triple for `T`.
pub struct TypeMapping<T> {
    put_resolver: Arc<dyn PutResolver<T>>,
    get_resolver: Arc<dyn GetResolver<T>>,
    delete_resolver: Arc<dyn DeleteResolver<T>>,
}

impl<T> Clone for TypeMapping<T> {
    fn clone(&self) -> Self {
        Self {
            put_resolver: Arc::clone(&self.put_resolver),
            get_resolver: Arc::clone(&self.get_resolver),
            delete_resolver: Arc::clone(&self.delete_resolver),
        }
    }
}

impl<T: 'static> TypeMapping<T> {
    pub fn builder() -> TypeMappingBuilder<T> {
        TypeMappingBuilder { _target: None }
    }

    /// Builds all three resolvers from one row mapper.
    pub fn from_mapper<M>(mapper: M) -> Self
    where
        M: RowMapper<T> + 'static,
    {
        let mapper = Arc::new(mapper);
        Self {
            put_resolver: Arc::new(DefaultPutResolver::new(Arc::clone(&mapper))),
            get_resolver: Arc::new(DefaultGetResolver::new(Arc::clone(&mapper))),
            delete_resolver: Arc::new(DefaultDeleteResolver::new(mapper)),
        }
    }

    pub fn put_resolver(&self) -> &Arc<dyn PutResolver<T>> {
        &self.put_resolver
    }

    pub fn get_resolver(&self) -> &Arc<dyn GetResolver<T>> {
        &self.get_resolver
    }

    pub fn delete_resolver(&self) -> &Arc<dyn DeleteResolver<T>> {
        &self.delete_resolver
    }
}

/// First stage: a put resolver is required.
pub struct TypeMappingBuilder<T> {
    _target: Option<fn() -> T>,
}

impl<T: 'static> TypeMappingBuilder<T> {
    pub fn put_resolver(self, resolver: impl PutResolver<T> + 'static) -> TypeMappingGetStage<T> {
        TypeMappingGetStage {
            put_resolver: Arc::new(resolver),
        }
    }
}

pub struct TypeMappingGetStage<T> {
    put_resolver: Arc<dyn PutResolver<T>>,
}

impl<T: 'static> TypeMappingGetStage<T> {
    pub fn get_resolver(
        self,
        resolver: impl GetResolver<T> + 'static,
    ) -> TypeMappingDeleteStage<T> {
        TypeMappingDeleteStage {
            put_resolver: self.put_resolver,
            get_resolver: Arc::new(resolver),
        }
    }
}

pub struct TypeMappingDeleteStage<T> {
    put_resolver: Arc<dyn PutResolver<T>>,
    get_resolver: Arc<dyn GetResolver<T>>,
}

impl<T: 'static> TypeMappingDeleteStage<T> {
    pub fn delete_resolver(
        self,
        resolver: impl DeleteResolver<T> + 'static,
    ) -> CompleteTypeMappingBuilder<T> {
        CompleteTypeMappingBuilder {
            mapping: TypeMapping {
                put_resolver: self.put_resolver,
                get_resolver: self.get_resolver,
                delete_resolver: Arc::new(resolver),
            },
        }
    }
}

pub struct CompleteTypeMappingBuilder<T> {
    mapping: TypeMapping<T>,
}

impl<T: 'static> CompleteTypeMappingBuilder<T> {
    pub fn build(self) -> TypeMapping<T> {
        self.mapping
    }
}
