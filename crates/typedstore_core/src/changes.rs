//! Change events published after successful mutations.

use crate::location::StorageLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What produced a [`Changes`] event, when it came from this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOrigin {
    /// `put`, `delete`, `execute_sql`, ...
    pub operation: String,
    pub type_name: Option<String>,
}

impl ChangeOrigin {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            type_name: None,
        }
    }

    pub fn for_type<T: ?Sized>(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            type_name: Some(std::any::type_name::<T>().to_string()),
        }
    }
}

/// Immutable set of locations mutated by one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    locations: BTreeSet<StorageLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<ChangeOrigin>,
}

impl Changes {
    pub fn new<I, L>(locations: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<StorageLocation>,
    {
        Self {
            locations: locations.into_iter().map(Into::into).collect(),
            origin: None,
        }
    }

    /// Event for a single location.
    pub fn of(location: impl Into<StorageLocation>) -> Self {
        Self::new([location.into()])
    }

    pub fn with_origin(mut self, origin: ChangeOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn locations(&self) -> &BTreeSet<StorageLocation> {
        &self.locations
    }

    pub fn origin(&self) -> Option<&ChangeOrigin> {
        self.origin.as_ref()
    }

    pub fn affects(&self, location: &StorageLocation) -> bool {
        self.locations.contains(location)
    }

    pub fn intersects(&self, observed: &BTreeSet<StorageLocation>) -> bool {
        // Iterate the smaller side; both are usually one or two entries.
        if self.locations.len() <= observed.len() {
            self.locations.iter().any(|location| observed.contains(location))
        } else {
            observed.iter().any(|location| self.locations.contains(location))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeOrigin, Changes};
    use crate::location::{locations, StorageLocation};

    #[test]
    fn intersects_checks_any_shared_location() {
        let changes = Changes::new(["items", "tags"]);
        assert!(changes.intersects(&locations(["tags", "users"])));
        assert!(!changes.intersects(&locations(["users"])));
        assert!(changes.affects(&StorageLocation::table("items")));
    }

    #[test]
    fn serializes_without_empty_origin() {
        let plain = serde_json::to_value(Changes::of("items")).unwrap();
        assert_eq!(plain, serde_json::json!({ "locations": ["items"] }));

        let tagged = Changes::of("items").with_origin(ChangeOrigin::new("put"));
        let json = serde_json::to_string(&tagged).unwrap();
        let back: Changes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tagged);
    }
}
