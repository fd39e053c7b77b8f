// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometry reuse for repeated group and assembly members.
//!
//! Buildings place the same group type many times (a bathroom pod, a truss
//! assembly). Every unmodified member with the same [`BodyGroupKey`] has the
//! same geometry, so its shape representations are built once and shared by
//! handle across all later instances.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::document::Handle;
use crate::ids::{BodyGroupKey, ElementId};

/// Shape representation handles of one exported group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyGroupData {
    handles: SmallVec<[Handle; 2]>,
    material: Option<ElementId>,
}

impl BodyGroupData {
    pub fn new(handles: impl IntoIterator<Item = Handle>, material: Option<ElementId>) -> Self {
        Self {
            handles: handles.into_iter().collect(),
            material,
        }
    }

    /// Representation handles in representation order.
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Material the geometry was built with.
    pub fn material(&self) -> Option<ElementId> {
        self.material
    }
}

/// Result of [`GeometryGroupCache::lookup_for`].
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<BodyGroupData>),
    Miss,
    /// The cached entry was built with a different material. The caller
    /// builds full geometry and invalidates the key once its element commits.
    Mismatch,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
}

/// Session-wide cache from [`BodyGroupKey`] to shared representation handles.
#[derive(Debug, Default)]
pub struct GeometryGroupCache {
    entries: FxHashMap<BodyGroupKey, Arc<BodyGroupData>>,
    /// Keys invalidated by a mismatch; never cached again this session.
    poisoned: FxHashSet<BodyGroupKey>,
    stats: CacheStats,
}

impl GeometryGroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared data for a key.
    pub fn lookup(&self, key: &BodyGroupKey) -> Option<Arc<BodyGroupData>> {
        self.entries.get(key).map(Arc::clone)
    }

    /// Looks up a key for an element built with `material`, counting the
    /// outcome. A material mismatch leaves the entry in place.
    pub fn lookup_for(&mut self, key: &BodyGroupKey, material: Option<ElementId>) -> CacheLookup {
        let Some(cached) = self.entries.get(key) else {
            self.stats.misses += 1;
            return CacheLookup::Miss;
        };

        if cached.material != material {
            tracing::warn!(
                group_type = %key.group_type_id,
                member_index = key.member_index,
                "cached group member geometry has a different material, rebuilding"
            );
            return CacheLookup::Mismatch;
        }

        self.stats.hits += 1;
        CacheLookup::Hit(Arc::clone(cached))
    }

    /// Stores data for a key and returns the shared entry.
    ///
    /// Re-inserting equal data keeps the existing entry. Inserting different
    /// data for a cached key is a mismatch: the entry is discarded and the
    /// key is not cached again.
    pub fn insert(&mut self, key: BodyGroupKey, data: BodyGroupData) -> Arc<BodyGroupData> {
        if self.poisoned.contains(&key) {
            return Arc::new(data);
        }

        if let Some(existing) = self.entries.get(&key) {
            if **existing == data {
                return Arc::clone(existing);
            }
            tracing::warn!(
                group_type = %key.group_type_id,
                member_index = key.member_index,
                "group member key reused with different geometry, discarding cache entry"
            );
            self.invalidate(&key);
            return Arc::new(data);
        }

        let shared = Arc::new(data);
        self.entries.insert(key, Arc::clone(&shared));
        shared
    }

    /// Drops a key and stops caching it for the rest of the session.
    pub fn invalidate(&mut self, key: &BodyGroupKey) {
        if self.entries.remove(key).is_some() {
            self.stats.invalidations += 1;
        }
        self.poisoned.insert(*key);
    }

    pub fn is_poisoned(&self, key: &BodyGroupKey) -> bool {
        self.poisoned.contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn handles(n: usize) -> Vec<Handle> {
        let mut map: SlotMap<Handle, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn key(index: i32) -> BodyGroupKey {
        BodyGroupKey::new(ElementId::new(7), index)
    }

    #[test]
    fn insert_then_lookup_is_reference_stable() {
        let mut cache = GeometryGroupCache::new();
        let hs = handles(2);
        cache.insert(key(0), BodyGroupData::new(hs.clone(), None));

        let first = cache.lookup(&key(0)).unwrap();
        let second = cache.lookup(&key(0)).unwrap();
        assert_eq!(first.handles(), hs.as_slice());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn reinserting_equal_data_is_a_no_op() {
        let mut cache = GeometryGroupCache::new();
        let hs = handles(1);
        let a = cache.insert(key(0), BodyGroupData::new(hs.clone(), None));
        let b = cache.insert(key(0), BodyGroupData::new(hs, None));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[test]
    fn mismatched_insert_discards_entry() {
        let mut cache = GeometryGroupCache::new();
        let hs = handles(2);
        cache.insert(key(0), BodyGroupData::new([hs[0]], None));
        cache.insert(key(0), BodyGroupData::new([hs[1]], None));

        assert!(cache.lookup(&key(0)).is_none());
        assert!(cache.is_poisoned(&key(0)));

        cache.insert(key(0), BodyGroupData::new([hs[0]], None));
        assert!(cache.lookup(&key(0)).is_none());
    }

    #[test]
    fn material_mismatch_is_reported_until_invalidated() {
        let mut cache = GeometryGroupCache::new();
        let hs = handles(1);
        cache.insert(key(1), BodyGroupData::new(hs, Some(ElementId::new(100))));

        assert!(matches!(
            cache.lookup_for(&key(1), Some(ElementId::new(100))),
            CacheLookup::Hit(_)
        ));
        assert!(matches!(
            cache.lookup_for(&key(1), Some(ElementId::new(200))),
            CacheLookup::Mismatch
        ));
        assert!(cache.lookup(&key(1)).is_some());

        cache.invalidate(&key(1));
        assert!(matches!(cache.lookup_for(&key(1), None), CacheLookup::Miss));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.invalidations, 1);
    }

    #[test]
    fn distinct_member_indices_do_not_collide() {
        let mut cache = GeometryGroupCache::new();
        let hs = handles(2);
        cache.insert(key(0), BodyGroupData::new([hs[0]], None));
        cache.insert(key(1), BodyGroupData::new([hs[1]], None));
        assert_eq!(cache.lookup(&key(0)).unwrap().handles(), &[hs[0]]);
        assert_eq!(cache.lookup(&key(1)).unwrap().handles(), &[hs[1]]);
    }
}
