// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The output document: the instance graph the export writes into.
//!
//! [`OutputDocument`] is the sink contract. A serializer that turns committed
//! instances into STEP text can implement it directly, or read back an
//! [`InstanceArena`] once the session is finished.
//!
//! Every created instance is journaled. A [`Mark`] is a position in that
//! journal, and [`OutputDocument::rollback_to`] removes everything created
//! after it. [`BuildTransaction`](crate::BuildTransaction) is the only
//! intended caller of `create`.

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::entity::EntityKind;
use crate::ids::GlobalId;

new_key_type! {
    /// Handle to an instance inside an output document.
    pub struct Handle;
}

/// Attribute value of an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    String(String),
    /// Enumeration literal, written as `.VALUE.`.
    Enum(String),
    Ref(Handle),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// List of references.
    pub fn refs<I: IntoIterator<Item = Handle>>(handles: I) -> Self {
        AttributeValue::List(handles.into_iter().map(AttributeValue::Ref).collect())
    }

    /// List of reals, e.g. a cartesian point.
    pub fn reals<I: IntoIterator<Item = f64>>(values: I) -> Self {
        AttributeValue::List(values.into_iter().map(AttributeValue::Real).collect())
    }

    /// Returns the referenced handle for `Ref` values.
    pub fn as_ref_handle(&self) -> Option<Handle> {
        match self {
            AttributeValue::Ref(h) => Some(*h),
            _ => None,
        }
    }

    fn collect_refs(&self, out: &mut Vec<Handle>) {
        match self {
            AttributeValue::Ref(h) => out.push(*h),
            AttributeValue::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            _ => {}
        }
    }
}

/// One IFC entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub kind: EntityKind,
    pub global_id: Option<GlobalId>,
    /// Named attributes in schema order.
    pub attributes: SmallVec<[(&'static str, AttributeValue); 6]>,
}

impl Instance {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            global_id: None,
            attributes: SmallVec::new(),
        }
    }

    pub fn with_global_id(mut self, id: GlobalId) -> Self {
        self.global_id = Some(id);
        self
    }

    /// Appends an attribute.
    pub fn with(mut self, name: &'static str, value: AttributeValue) -> Self {
        self.attributes.push((name, value));
        self
    }

    /// Appends an optional string attribute, `Null` when absent.
    pub fn with_text(self, name: &'static str, value: Option<&str>) -> Self {
        let value = value
            .map(|s| AttributeValue::String(s.to_string()))
            .unwrap_or(AttributeValue::Null);
        self.with(name, value)
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// All handles referenced by this instance, in attribute order.
    pub fn references(&self) -> Vec<Handle> {
        let mut out = Vec::new();
        for (_, value) in &self.attributes {
            value.collect_refs(&mut out);
        }
        out
    }
}

/// Position in a document's creation journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(pub(crate) usize);

/// Sink that receives created instances.
pub trait OutputDocument {
    /// Stores an instance and returns its handle.
    fn create(&mut self, instance: Instance) -> Handle;

    /// Returns the instance for a handle, if it is still present.
    fn get(&self, handle: Handle) -> Option<&Instance>;

    /// Returns `true` if the handle refers to a live instance.
    fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Current journal position.
    fn mark(&self) -> Mark;

    /// Removes every instance created after `mark`. Returns how many were removed.
    fn rollback_to(&mut self, mark: Mark) -> usize;

    /// Drops journal entries after `mark`, making those instances permanent.
    fn release(&mut self, mark: Mark);

    /// Issues a globally unique identifier.
    fn new_global_id(&mut self) -> GlobalId;

    /// Number of live instances.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum GuidSource {
    Random,
    Sequential(u128),
}

/// In-memory [`OutputDocument`] backed by a slot map.
///
/// # Example
///
/// ```
/// use ifc_lite_export::{EntityKind, Instance, InstanceArena, OutputDocument};
///
/// let mut doc = InstanceArena::new();
/// let mark = doc.mark();
/// let h = doc.create(Instance::new(EntityKind::IfcWall));
/// assert!(doc.contains(h));
///
/// doc.rollback_to(mark);
/// assert!(!doc.contains(h));
/// ```
#[derive(Debug)]
pub struct InstanceArena {
    instances: SlotMap<Handle, Instance>,
    /// Handles in creation order, since the last release.
    journal: Vec<Handle>,
    /// Journal entries dropped by `release`, so marks stay absolute.
    released: usize,
    guids: GuidSource,
}

impl InstanceArena {
    /// Creates an empty arena issuing random GlobalIds.
    pub fn new() -> Self {
        Self {
            instances: SlotMap::with_key(),
            journal: Vec::new(),
            released: 0,
            guids: GuidSource::Random,
        }
    }

    /// Creates an empty arena issuing sequential GlobalIds, for reproducible output.
    pub fn with_sequential_ids() -> Self {
        Self {
            guids: GuidSource::Sequential(1),
            ..Self::new()
        }
    }

    /// Iterates over live instances in creation order of their slots.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Instance)> {
        self.instances.iter()
    }

    /// Live instances of one entity kind.
    pub fn instances_of(&self, kind: EntityKind) -> impl Iterator<Item = (Handle, &Instance)> {
        self.instances.iter().filter(move |(_, i)| i.kind == kind)
    }

    /// Number of live instances of one entity kind.
    pub fn count_of(&self, kind: EntityKind) -> usize {
        self.instances_of(kind).count()
    }
}

impl Default for InstanceArena {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDocument for InstanceArena {
    fn create(&mut self, instance: Instance) -> Handle {
        let handle = self.instances.insert(instance);
        self.journal.push(handle);
        handle
    }

    fn get(&self, handle: Handle) -> Option<&Instance> {
        self.instances.get(handle)
    }

    fn mark(&self) -> Mark {
        Mark(self.released + self.journal.len())
    }

    fn rollback_to(&mut self, mark: Mark) -> usize {
        let keep = mark.0.saturating_sub(self.released);
        let mut removed = 0;
        while self.journal.len() > keep {
            if let Some(handle) = self.journal.pop() {
                if self.instances.remove(handle).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }

    fn release(&mut self, mark: Mark) {
        let keep = mark.0.saturating_sub(self.released);
        if keep < self.journal.len() {
            self.released += self.journal.len() - keep;
            self.journal.truncate(keep);
        }
    }

    fn new_global_id(&mut self) -> GlobalId {
        match &mut self.guids {
            GuidSource::Random => GlobalId::new_v4(),
            GuidSource::Sequential(next) => {
                let id = GlobalId::from_u128(*next);
                *next += 1;
                id
            }
        }
    }

    fn len(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_removes_only_newer_instances() {
        let mut doc = InstanceArena::new();
        let kept = doc.create(Instance::new(EntityKind::IfcWall));
        let mark = doc.mark();
        let a = doc.create(Instance::new(EntityKind::IfcSlab));
        let b = doc.create(Instance::new(EntityKind::IfcBeam));

        assert_eq!(doc.rollback_to(mark), 2);
        assert!(doc.contains(kept));
        assert!(!doc.contains(a));
        assert!(!doc.contains(b));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn released_instances_survive_rollback() {
        let mut doc = InstanceArena::new();
        let start = doc.mark();
        let a = doc.create(Instance::new(EntityKind::IfcWall));
        doc.release(start);

        let mark = doc.mark();
        assert!(mark > start);
        let b = doc.create(Instance::new(EntityKind::IfcSlab));
        doc.rollback_to(mark);

        assert!(doc.contains(a));
        assert!(!doc.contains(b));
    }

    #[test]
    fn references_include_nested_lists() {
        let mut doc = InstanceArena::new();
        let a = doc.create(Instance::new(EntityKind::IfcWall));
        let b = doc.create(Instance::new(EntityKind::IfcSlab));
        let rel = Instance::new(EntityKind::IfcRelAggregates)
            .with("RelatedObjects", AttributeValue::refs([a, b]))
            .with("Name", AttributeValue::Null);

        assert_eq!(rel.references(), vec![a, b]);
        assert_eq!(rel.attribute("Name"), Some(&AttributeValue::Null));
    }

    #[test]
    fn sequential_ids_are_reproducible() {
        let mut first = InstanceArena::with_sequential_ids();
        let mut second = InstanceArena::with_sequential_ids();
        assert_eq!(first.new_global_id(), second.new_global_id());
        assert_ne!(first.new_global_id(), GlobalId::from_u128(1));
    }
}
