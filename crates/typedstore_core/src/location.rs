//! Storage location identity.
//!
//! # Responsibility
//! - Name the logical place rows live in (SQLite table or resource locator).
//! - Act as the correlation key between mutations and observers.
//!
//! # Invariants
//! - Equality, ordering and hashing use the identity string only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Logical storage target: a table name or a resource locator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLocation(String);

impl StorageLocation {
    /// Location backed by a relational table.
    pub fn table(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Location addressed by a resource locator such as `content://notes/items`.
    pub fn uri(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StorageLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageLocation {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StorageLocation {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StorageLocation {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds a location set from anything convertible into locations.
pub fn locations<I, L>(items: I) -> BTreeSet<StorageLocation>
where
    I: IntoIterator<Item = L>,
    L: Into<StorageLocation>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::{locations, StorageLocation};

    #[test]
    fn table_and_uri_with_same_identity_are_equal() {
        assert_eq!(
            StorageLocation::table("content://items"),
            StorageLocation::uri("content://items")
        );
    }

    #[test]
    fn locations_deduplicates_input() {
        let set = locations(["notes", "tags", "notes"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&StorageLocation::table("tags")));
    }
}
