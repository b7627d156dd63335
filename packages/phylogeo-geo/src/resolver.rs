use crate::location::GeonameId;
use std::collections::{HashMap, HashSet};

/// Source of enclosing-region ids for a record's location.
///
/// Backed by a read-only search index in production; needs no coordination.
pub trait AncestorResolver: Send + Sync {
    /// Ancestor geoname ids of the record's location, excluding the location itself.
    /// `None` or an empty set means the record cannot be placed.
    fn ancestors(&self, record_id: &str) -> Option<HashSet<GeonameId>>;
}

/// Map-backed resolver (tests, CLI job files)
#[derive(Debug, Clone, Default)]
pub struct InMemoryAncestorResolver {
    table: HashMap<String, HashSet<GeonameId>>,
}

impl InMemoryAncestorResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record_id: impl Into<String>, ancestors: impl IntoIterator<Item = GeonameId>) {
        self.table
            .insert(record_id.into(), ancestors.into_iter().collect());
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl FromIterator<(String, Vec<GeonameId>)> for InMemoryAncestorResolver {
    fn from_iter<I: IntoIterator<Item = (String, Vec<GeonameId>)>>(iter: I) -> Self {
        let mut resolver = Self::new();
        for (record_id, ancestors) in iter {
            resolver.insert(record_id, ancestors);
        }
        resolver
    }
}

impl AncestorResolver for InMemoryAncestorResolver {
    fn ancestors(&self, record_id: &str) -> Option<HashSet<GeonameId>> {
        self.table.get(record_id).filter(|a| !a.is_empty()).cloned()
    }
}
