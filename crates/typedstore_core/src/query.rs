//! Immutable query descriptors.
//!
//! # Responsibility
//! - Describe reads, updates, deletes and raw statements independent of the
//!   backend that executes them.
//! - Carry the storage locations each descriptor observes or affects.
//!
//! # Invariants
//! - Every structured descriptor names exactly one location; builders do not
//!   expose `build()` until it is set.
//! - Raw statements declare observed/affected locations explicitly because
//!   their text is never introspected.

use crate::location::StorageLocation;
use rusqlite::types::Value;
use std::collections::BTreeSet;

/// Where-clause text with positional `?` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    clause: String,
    args: Vec<Value>,
}

impl Filter {
    pub fn new<I, V>(clause: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            clause: clause.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `column = ?` filter.
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::new(format!("{column} = ?"), [value.into()])
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Row limit with optional offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub count: u32,
    pub offset: u32,
}

/// Structured read against one location.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    location: StorageLocation,
    distinct: bool,
    columns: Vec<String>,
    filter: Option<Filter>,
    group_by: Option<String>,
    having: Option<String>,
    order_by: Option<String>,
    limit: Option<Limit>,
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn distinct(&self) -> bool {
        self.distinct
    }

    /// Projection; empty means all columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group_by.as_deref()
    }

    pub fn having(&self) -> Option<&str> {
        self.having.as_deref()
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn limit(&self) -> Option<Limit> {
        self.limit
    }
}

/// First stage of [`Query`] construction: the location is mandatory.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    pub fn table(self, table: impl Into<String>) -> CompleteQueryBuilder {
        self.location(StorageLocation::table(table))
    }

    pub fn location(self, location: impl Into<StorageLocation>) -> CompleteQueryBuilder {
        CompleteQueryBuilder {
            query: Query {
                location: location.into(),
                distinct: false,
                columns: Vec::new(),
                filter: None,
                group_by: None,
                having: None,
                order_by: None,
                limit: None,
            },
        }
    }
}

/// [`Query`] builder with its location set.
#[derive(Debug, Clone)]
pub struct CompleteQueryBuilder {
    query: Query,
}

impl CompleteQueryBuilder {
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.query.distinct = distinct;
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filter = Some(filter);
        self
    }

    pub fn group_by(mut self, group_by: impl Into<String>) -> Self {
        self.query.group_by = Some(group_by.into());
        self
    }

    pub fn having(mut self, having: impl Into<String>) -> Self {
        self.query.having = Some(having.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.query.order_by = Some(order_by.into());
        self
    }

    pub fn limit(mut self, count: u32) -> Self {
        self.query.limit = Some(Limit { count, offset: 0 });
        self
    }

    pub fn limit_offset(mut self, offset: u32, count: u32) -> Self {
        self.query.limit = Some(Limit { count, offset });
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Opaque backend statement with explicit location bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    statement: String,
    args: Vec<Value>,
    observed: BTreeSet<StorageLocation>,
    affected: BTreeSet<StorageLocation>,
}

impl RawQuery {
    pub fn builder() -> RawQueryBuilder {
        RawQueryBuilder
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Locations a read depends on; drives live-query refresh.
    pub fn observed(&self) -> &BTreeSet<StorageLocation> {
        &self.observed
    }

    /// Locations a statement mutates; published after `execute_sql`.
    pub fn affected(&self) -> &BTreeSet<StorageLocation> {
        &self.affected
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawQueryBuilder;

impl RawQueryBuilder {
    pub fn statement(self, statement: impl Into<String>) -> CompleteRawQueryBuilder {
        CompleteRawQueryBuilder {
            query: RawQuery {
                statement: statement.into(),
                args: Vec::new(),
                observed: BTreeSet::new(),
                affected: BTreeSet::new(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompleteRawQueryBuilder {
    query: RawQuery,
}

impl CompleteRawQueryBuilder {
    pub fn args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn observes<I, L>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<StorageLocation>,
    {
        self.query
            .observed
            .extend(locations.into_iter().map(Into::into));
        self
    }

    pub fn affects<I, L>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<StorageLocation>,
    {
        self.query
            .affected
            .extend(locations.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> RawQuery {
        self.query
    }
}

/// Read descriptor accepted by get operations.
#[derive(Debug, Clone, PartialEq)]
pub enum GetQuery {
    Structured(Query),
    Raw(RawQuery),
}

impl GetQuery {
    /// Locations whose changes invalidate this read.
    pub fn observed_locations(&self) -> BTreeSet<StorageLocation> {
        match self {
            Self::Structured(query) => BTreeSet::from([query.location().clone()]),
            Self::Raw(query) => query.observed().clone(),
        }
    }
}

impl From<Query> for GetQuery {
    fn from(value: Query) -> Self {
        Self::Structured(value)
    }
}

impl From<RawQuery> for GetQuery {
    fn from(value: RawQuery) -> Self {
        Self::Raw(value)
    }
}

/// Delete descriptor; no filter deletes every row of the location.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    location: StorageLocation,
    filter: Option<Filter>,
}

impl DeleteQuery {
    pub fn new(location: impl Into<StorageLocation>, filter: Option<Filter>) -> Self {
        Self {
            location: location.into(),
            filter,
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }
}

/// Update descriptor; values come from the row passed alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    location: StorageLocation,
    filter: Option<Filter>,
}

impl UpdateQuery {
    pub fn new(location: impl Into<StorageLocation>, filter: Option<Filter>) -> Self {
        Self {
            location: location.into(),
            filter,
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, GetQuery, Limit, Query, RawQuery};
    use crate::location::StorageLocation;
    use rusqlite::types::Value;

    #[test]
    fn query_builder_keeps_all_clauses() {
        let query = Query::builder()
            .table("items")
            .distinct(true)
            .columns(["_id", "value"])
            .filter(Filter::eq("value", "x".to_string()))
            .order_by("_id DESC")
            .limit_offset(5, 10)
            .build();

        assert_eq!(query.location(), &StorageLocation::table("items"));
        assert!(query.distinct());
        assert_eq!(query.columns(), ["_id".to_string(), "value".to_string()]);
        assert_eq!(query.filter().unwrap().clause(), "value = ?");
        assert_eq!(
            query.filter().unwrap().args(),
            [Value::Text("x".to_string())]
        );
        assert_eq!(query.limit(), Some(Limit { count: 10, offset: 5 }));
    }

    #[test]
    fn observed_locations_follow_query_kind() {
        let structured: GetQuery = Query::builder().table("items").build().into();
        assert_eq!(structured.observed_locations().len(), 1);

        let raw: GetQuery = RawQuery::builder()
            .statement("SELECT * FROM items JOIN tags")
            .observes(["items", "tags"])
            .build()
            .into();
        assert_eq!(raw.observed_locations().len(), 2);

        let unobserved: GetQuery = RawQuery::builder().statement("SELECT 1").build().into();
        assert!(unobserved.observed_locations().is_empty());
    }
}
