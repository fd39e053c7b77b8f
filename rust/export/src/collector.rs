// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Committed products grouped by the level that contains them.

use std::collections::{BTreeMap, BTreeSet};

use crate::document::Handle;
use crate::ids::ElementId;

/// Products per containing level, written as
/// `IfcRelContainedInSpatialStructure` when the session finishes.
#[derive(Debug, Clone, Default)]
pub struct ProductCollector {
    by_level: BTreeMap<ElementId, BTreeSet<Handle>>,
}

impl ProductCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a committed product. Returns `false` if it was already collected.
    pub fn add(&mut self, level_id: ElementId, product: Handle) -> bool {
        self.by_level.entry(level_id).or_default().insert(product)
    }

    pub fn products_on(&self, level_id: ElementId) -> impl Iterator<Item = Handle> + '_ {
        self.by_level.get(&level_id).into_iter().flatten().copied()
    }

    pub fn contains(&self, product: Handle) -> bool {
        self.by_level.values().any(|set| set.contains(&product))
    }

    /// Levels with their products, ordered by level id.
    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &BTreeSet<Handle>)> {
        self.by_level.iter().map(|(level, set)| (*level, set))
    }

    /// Total number of collected products.
    pub fn len(&self) -> usize {
        self.by_level.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_level.values().all(BTreeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn products_are_grouped_and_deduplicated() {
        let mut map: SlotMap<Handle, ()> = SlotMap::with_key();
        let (a, b) = (map.insert(()), map.insert(()));
        let mut collector = ProductCollector::new();

        assert!(collector.add(ElementId::new(1), a));
        assert!(!collector.add(ElementId::new(1), a));
        assert!(collector.add(ElementId::new(2), b));

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.products_on(ElementId::new(1)).collect::<Vec<_>>(), vec![a]);
        assert_eq!(collector.products_on(ElementId::new(3)).count(), 0);
        assert!(collector.contains(b));
    }
}
