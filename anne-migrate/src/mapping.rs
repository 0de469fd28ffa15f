//! Source id to destination id mapping

use anne_core::{MigrationLog, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Source entity types whose ids other entities refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Country,
    Zone,
    Language,
    ProductOption,
    Category,
    Customer,
    Product,
    ProductOptionValue,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Country,
        EntityKind::Zone,
        EntityKind::Language,
        EntityKind::ProductOption,
        EntityKind::Category,
        EntityKind::Customer,
        EntityKind::Product,
        EntityKind::ProductOptionValue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Country => "country",
            EntityKind::Zone => "zone",
            EntityKind::Language => "language",
            EntityKind::ProductOption => "productOption",
            EntityKind::Category => "category",
            EntityKind::Customer => "customer",
            EntityKind::Product => "product",
            EntityKind::ProductOptionValue => "productOptionValue",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A mapping a transform wants recorded once its document is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposedMapping {
    pub kind: EntityKind,
    pub source_id: i64,
    pub destination_id: ObjectId,
}

impl ProposedMapping {
    pub fn new(kind: EntityKind, source_id: i64, destination_id: ObjectId) -> Self {
        Self {
            kind,
            source_id,
            destination_id,
        }
    }
}

/// In-memory mapping table, one map per entity kind. Never persisted.
#[derive(Debug, Default)]
pub struct MappingTable {
    maps: HashMap<EntityKind, HashMap<i64, ObjectId>>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. Last write wins.
    pub fn set(&mut self, kind: EntityKind, source_id: i64, destination_id: ObjectId) {
        self.maps
            .entry(kind)
            .or_default()
            .insert(source_id, destination_id);
    }

    pub fn get(&self, kind: EntityKind, source_id: i64) -> Option<ObjectId> {
        self.maps.get(&kind)?.get(&source_id).copied()
    }

    /// `get` that logs unresolved references. Source id 0 is OpenCart's
    /// "none" and resolves to `None` silently.
    pub fn resolve(
        &self,
        kind: EntityKind,
        source_id: i64,
        log: &MigrationLog,
        context: &str,
    ) -> Option<ObjectId> {
        if source_id == 0 {
            return None;
        }
        let resolved = self.get(kind, source_id);
        if resolved.is_none() {
            log.warn(format!("{context}: {kind} {source_id} not found, stored as null"));
        }
        resolved
    }

    pub fn commit(&mut self, mapping: ProposedMapping) {
        self.set(mapping.kind, mapping.source_id, mapping.destination_id);
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.maps.get(&kind).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.len(kind) == 0
    }

    /// Replace a kind's map with entries read back from the destination
    pub fn hydrate<I>(&mut self, kind: EntityKind, entries: I) -> usize
    where
        I: IntoIterator<Item = (i64, ObjectId)>,
    {
        let map: HashMap<i64, ObjectId> = entries.into_iter().collect();
        let loaded = map.len();
        self.maps.insert(kind, map);
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_and_get() {
        let mut table = MappingTable::new();
        let id = ObjectId::new();
        table.set(EntityKind::Country, 101, id);

        assert_eq!(table.get(EntityKind::Country, 101), Some(id));
        assert_eq!(table.get(EntityKind::Country, 102), None);
        assert_eq!(table.get(EntityKind::Zone, 101), None);
        assert_eq!(table.len(EntityKind::Country), 1);
        assert!(table.is_empty(EntityKind::Zone));
    }

    #[test]
    fn test_resolve_zero_is_silent_none() {
        let mut table = MappingTable::new();
        table.set(EntityKind::Customer, 0, ObjectId::new());
        let log = MigrationLog::console("orders");
        assert_eq!(table.resolve(EntityKind::Customer, 0, &log, "Order 1"), None);
    }

    #[test]
    fn test_hydrate_replaces() {
        let mut table = MappingTable::new();
        table.set(EntityKind::Product, 1, ObjectId::new());
        let fresh = ObjectId::new();
        assert_eq!(table.hydrate(EntityKind::Product, vec![(2, fresh)]), 1);
        assert_eq!(table.get(EntityKind::Product, 1), None);
        assert_eq!(table.get(EntityKind::Product, 2), Some(fresh));
    }

    proptest! {
        #[test]
        fn prop_last_write_wins(writes in prop::collection::vec((0usize..8, 1i64..50), 1..200)) {
            let mut table = MappingTable::new();
            let mut expected: HashMap<(EntityKind, i64), ObjectId> = HashMap::new();

            for (kind_idx, source_id) in writes {
                let kind = EntityKind::ALL[kind_idx];
                let id = ObjectId::new();
                table.set(kind, source_id, id);
                expected.insert((kind, source_id), id);
            }

            for ((kind, source_id), id) in &expected {
                prop_assert_eq!(table.get(*kind, *source_id), Some(*id));
            }
            for kind in EntityKind::ALL {
                let count = expected.keys().filter(|(k, _)| *k == kind).count();
                prop_assert_eq!(table.len(kind), count);
            }
        }
    }
}
