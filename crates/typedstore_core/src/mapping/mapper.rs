//! Resolvers derived from a single row mapper.
//!
//! # Responsibility
//! - Translate between a domain type and its [`Row`] in one place.
//! - Provide the default key-based put/get/delete policies on top of it.
//!
//! # Invariants
//! - Put with a key queries before writing: no match inserts, a match updates.
//! - Put without a key always inserts.
//! - Delete requires a key; a keyless object is a resolver error, never a
//!   table-wide delete.

use crate::backend::RowHandle;
use crate::error::BoxError;
use crate::location::StorageLocation;
use crate::operations::delete::{DeleteResolver, DeleteResult};
use crate::operations::get::{query_rows, GetResolver};
use crate::operations::put::{PutResolver, PutResult};
use crate::query::{DeleteQuery, Filter, GetQuery, Query, UpdateQuery};
use crate::row::Row;
use crate::store::Store;
use std::sync::Arc;

/// Two-way translation between `T` and its stored row.
pub trait RowMapper<T>: Send + Sync {
    /// Location every object of this type is stored in.
    fn location(&self) -> StorageLocation;

    fn to_row(&self, object: &T) -> Row;

    fn from_row(&self, row: &Row) -> Result<T, BoxError>;

    /// Filter matching the stored row of `object`; `None` while the object has
    /// no identity yet.
    fn key_filter(&self, object: &T) -> Option<Filter>;
}

/// Insert-or-update by key.
pub struct DefaultPutResolver<M> {
    mapper: Arc<M>,
}

impl<M> DefaultPutResolver<M> {
    pub fn new(mapper: Arc<M>) -> Self {
        Self { mapper }
    }
}

impl<T, M> PutResolver<T> for DefaultPutResolver<M>
where
    M: RowMapper<T>,
{
    fn perform_put(&self, store: &Store, object: &T) -> Result<PutResult, BoxError> {
        let backend = store.backend();
        let location = self.mapper.location();
        let row = self.mapper.to_row(object);

        let Some(filter) = self.mapper.key_filter(object) else {
            return insert_row(store, location, &row);
        };

        let existing = {
            let lookup = Query::builder()
                .location(location.clone())
                .filter(filter.clone())
                .build();
            let mut handle = backend.query(&lookup)?;
            let count = handle.count();
            handle.close();
            count
        };

        if existing == 0 {
            return insert_row(store, location, &row);
        }

        let updated = backend.update(&UpdateQuery::new(location.clone(), Some(filter)), &row)?;
        Ok(PutResult::updated(updated, location))
    }
}

pub(crate) fn insert_row(
    store: &Store,
    location: StorageLocation,
    row: &Row,
) -> Result<PutResult, BoxError> {
    Ok(match store.backend().insert(&location, row)? {
        Some(id) => PutResult::inserted(id, location),
        None => PutResult::failed(location),
    })
}

/// Reads through the backend, maps each row with the mapper.
pub struct DefaultGetResolver<M> {
    mapper: Arc<M>,
}

impl<M> DefaultGetResolver<M> {
    pub fn new(mapper: Arc<M>) -> Self {
        Self { mapper }
    }
}

impl<T, M> GetResolver<T> for DefaultGetResolver<M>
where
    M: RowMapper<T>,
{
    fn perform_get(&self, store: &Store, query: &GetQuery) -> Result<Box<dyn RowHandle>, BoxError> {
        Ok(query_rows(store, query)?)
    }

    fn map_from_row(&self, row: &Row) -> Result<T, BoxError> {
        self.mapper.from_row(row)
    }
}

/// Deletes the row matching the object's key.
pub struct DefaultDeleteResolver<M> {
    mapper: Arc<M>,
}

impl<M> DefaultDeleteResolver<M> {
    pub fn new(mapper: Arc<M>) -> Self {
        Self { mapper }
    }
}

impl<T, M> DeleteResolver<T> for DefaultDeleteResolver<M>
where
    M: RowMapper<T>,
{
    fn perform_delete(&self, store: &Store, object: &T) -> Result<DeleteResult, BoxError> {
        let location = self.mapper.location();
        let filter = self.mapper.key_filter(object).ok_or_else(|| {
            format!("object stored in `{location}` has no key; refusing to delete by table")
        })?;

        let deleted = store
            .backend()
            .delete(&DeleteQuery::new(location.clone(), Some(filter)))?;
        Ok(DeleteResult::deleted(deleted, location))
    }
}
