//! Type-mapping registry keyed by exact Rust type.

use crate::error::{StoreError, StoreResult};
use crate::mapping::TypeMapping;
use std::any::{Any, TypeId};
use std::collections::HashMap;

struct RegisteredMapping {
    type_name: &'static str,
    mapping: Box<dyn Any + Send + Sync>,
}

/// Immutable-after-build map from type to its [`TypeMapping`].
///
/// Lookup is exact: a mapping for a type never answers for wrappers or
/// related types.
#[derive(Default)]
pub struct TypeMappingRegistry {
    mappings: HashMap<TypeId, RegisteredMapping>,
}

impl TypeMappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the mapping for `T`; a second registration is rejected.
    pub fn register<T: 'static>(&mut self, mapping: TypeMapping<T>) -> StoreResult<()> {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        if self.mappings.contains_key(&type_id) {
            return Err(StoreError::configuration(format!(
                "type mapping already registered for `{type_name}`"
            )));
        }

        self.mappings.insert(
            type_id,
            RegisteredMapping {
                type_name,
                mapping: Box::new(mapping),
            },
        );
        Ok(())
    }

    pub fn lookup<T: 'static>(&self) -> Option<TypeMapping<T>> {
        self.mappings
            .get(&TypeId::of::<T>())
            .and_then(|registered| registered.mapping.downcast_ref::<TypeMapping<T>>())
            .cloned()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Returns sorted names of registered types.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.mappings.values().map(|entry| entry.type_name).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TypeMappingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMappingRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
